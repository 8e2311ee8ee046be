use sqlx::Row;

use stagegate_core::domain::approval::ApprovalId;
use stagegate_core::domain::notification::{Notification, NotificationId, NotificationKind};
use stagegate_core::domain::project::ProjectId;
use stagegate_core::domain::user::UserId;

use super::{parse_timestamp, NotificationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> Result<Notification, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recipient: String =
        row.try_get("recipient").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sender_id: String =
        row.try_get("sender_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let kind_str: String =
        row.try_get("kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_id: Option<String> =
        row.try_get("approval_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let project_id: Option<String> =
        row.try_get("project_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message: String =
        row.try_get("message").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_read: bool =
        row.try_get("is_read").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let kind = NotificationKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind: {kind_str}")))?;

    Ok(Notification {
        id: NotificationId(id),
        recipient: UserId(recipient),
        sender_id: UserId(sender_id),
        kind,
        approval_id: approval_id.map(ApprovalId),
        project_id: project_id.map(ProjectId),
        message,
        is_read,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn append(&self, notification: &Notification) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notification (id, recipient, sender_id, kind, approval_id, project_id,
                                       message, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notification.id.0)
        .bind(&notification.recipient.0)
        .bind(&notification.sender_id.0)
        .bind(notification.kind.as_str())
        .bind(notification.approval_id.as_ref().map(|id| id.0.as_str()))
        .bind(notification.project_id.as_ref().map(|id| id.0.as_str()))
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, recipient, sender_id, kind, approval_id, project_id, message, is_read,
                    created_at
             FROM notification
             WHERE recipient = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&recipient.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect::<Result<Vec<_>, _>>()
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<bool, RepositoryError> {
        // The recipient guard keeps read state with its owner: nobody else
        // can flip it, not even an admin.
        let result = sqlx::query(
            "UPDATE notification SET is_read = 1 WHERE id = ? AND recipient = ?",
        )
        .bind(&id.0)
        .bind(&recipient.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use stagegate_core::domain::approval::ApprovalId;
    use stagegate_core::domain::notification::{Notification, NotificationKind};
    use stagegate_core::domain::user::UserId;

    use super::SqlNotificationRepository;
    use crate::repositories::NotificationRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn append_and_list_for_recipient() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let older = Notification::new(
            UserId("pm-ana".to_string()),
            UserId("client-cy".to_string()),
            NotificationKind::DecisionMade,
            Some(ApprovalId("APR-001".to_string())),
            None,
            "Your request APR-001 was approved".to_string(),
            Utc::now() - Duration::minutes(10),
        );
        let newer = Notification::new(
            UserId("pm-ana".to_string()),
            UserId("client-cy".to_string()),
            NotificationKind::PhaseChanged,
            None,
            None,
            "Project moved to testing".to_string(),
            Utc::now(),
        );
        let other = Notification::new(
            UserId("dev-rio".to_string()),
            UserId("client-cy".to_string()),
            NotificationKind::PhaseChanged,
            None,
            None,
            "Project moved to testing".to_string(),
            Utc::now(),
        );

        repo.append(&older).await.expect("append older");
        repo.append(&newer).await.expect("append newer");
        repo.append(&other).await.expect("append other");

        let inbox = repo
            .list_for_recipient(&UserId("pm-ana".to_string()), 10)
            .await
            .expect("list notifications");
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].kind, NotificationKind::PhaseChanged, "newest first");
        assert_eq!(inbox[1].approval_id, Some(ApprovalId("APR-001".to_string())));
        assert_eq!(inbox[1].sender_id, UserId("client-cy".to_string()));
        assert!(!inbox[1].is_read, "notifications start unread");
    }

    #[tokio::test]
    async fn mark_read_only_lands_for_the_recipient() {
        let pool = setup().await;
        let repo = SqlNotificationRepository::new(pool);

        let notification = Notification::new(
            UserId("pm-ana".to_string()),
            UserId("client-cy".to_string()),
            NotificationKind::DecisionMade,
            None,
            None,
            "Your request was approved".to_string(),
            Utc::now(),
        );
        repo.append(&notification).await.expect("append");

        let stranger = repo
            .mark_read(&notification.id, &UserId("dev-rio".to_string()))
            .await
            .expect("stranger mark");
        assert!(!stranger, "only the recipient may mark a notification read");

        let owner = repo
            .mark_read(&notification.id, &UserId("pm-ana".to_string()))
            .await
            .expect("owner mark");
        assert!(owner);

        let inbox = repo
            .list_for_recipient(&UserId("pm-ana".to_string()), 10)
            .await
            .expect("list");
        assert!(inbox[0].is_read);
    }
}
