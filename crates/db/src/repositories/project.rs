use sqlx::Row;

use stagegate_core::domain::project::{
    Project, ProjectId, ProjectMember, ProjectPhase, ProjectStatus,
};
use stagegate_core::domain::user::UserId;

use super::{parse_timestamp, ProjectRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProjectRepository {
    pool: DbPool,
}

impl SqlProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_project(
    row: &sqlx::sqlite::SqliteRow,
    members: Vec<ProjectMember>,
) -> Result<Project, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phase_str: String =
        row.try_get("phase").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let progress_pct: i64 =
        row.try_get("progress_pct").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let current_phase = ProjectPhase::parse(&phase_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown project phase: {phase_str}")))?;
    let status = ProjectStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown project status: {status_str}")))?;
    let progress_pct = u8::try_from(progress_pct)
        .map_err(|_| RepositoryError::Decode(format!("progress out of range: {progress_pct}")))?;

    Ok(Project {
        id: ProjectId(id),
        name,
        current_phase,
        status,
        progress_pct,
        members,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ProjectRepository for SqlProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, phase, status, progress_pct, created_at, updated_at
             FROM project WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let member_rows = sqlx::query(
            "SELECT user_id, notify_on_phase_change
             FROM project_member WHERE project_id = ? ORDER BY user_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let members = member_rows
            .iter()
            .map(|m| {
                let user_id: String =
                    m.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let notify: bool = m
                    .try_get("notify_on_phase_change")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(ProjectMember { user_id: UserId(user_id), notify_on_phase_change: notify })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(row_to_project(&row, members)?))
    }

    async fn save(&self, project: &Project) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO project (id, name, phase, status, progress_pct, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 phase = excluded.phase,
                 status = excluded.status,
                 progress_pct = excluded.progress_pct,
                 updated_at = excluded.updated_at",
        )
        .bind(&project.id.0)
        .bind(&project.name)
        .bind(project.current_phase.as_str())
        .bind(project.status.as_str())
        .bind(i64::from(project.progress_pct))
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM project_member WHERE project_id = ?")
            .bind(&project.id.0)
            .execute(&mut *tx)
            .await?;

        for member in &project.members {
            sqlx::query(
                "INSERT INTO project_member (project_id, user_id, notify_on_phase_change)
                 VALUES (?, ?, ?)",
            )
            .bind(&project.id.0)
            .bind(&member.user_id.0)
            .bind(member.notify_on_phase_change)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use stagegate_core::domain::project::{Project, ProjectId, ProjectMember, ProjectPhase};
    use stagegate_core::domain::user::UserId;

    use super::SqlProjectRepository;
    use crate::repositories::ProjectRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_project(id: &str) -> Project {
        Project::new(
            ProjectId(id.to_string()),
            "Website Relaunch".to_string(),
            ProjectPhase::Development,
            vec![
                ProjectMember { user_id: UserId("pm-ana".to_string()), notify_on_phase_change: true },
                ProjectMember {
                    user_id: UserId("dev-rio".to_string()),
                    notify_on_phase_change: false,
                },
            ],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_and_find_round_trips_members() {
        let pool = setup().await;
        let repo = SqlProjectRepository::new(pool);

        let project = sample_project("proj-100");
        repo.save(&project).await.expect("save");

        let found =
            repo.find_by_id(&ProjectId("proj-100".to_string())).await.expect("find").expect("row");
        assert_eq!(found.name, "Website Relaunch");
        assert_eq!(found.current_phase, ProjectPhase::Development);
        assert_eq!(found.progress_pct, 40);
        assert_eq!(found.members.len(), 2);
        assert!(found.is_member(&UserId("dev-rio".to_string())));
    }

    #[tokio::test]
    async fn save_replaces_membership() {
        let pool = setup().await;
        let repo = SqlProjectRepository::new(pool);

        let mut project = sample_project("proj-100");
        repo.save(&project).await.expect("save");

        project.members =
            vec![ProjectMember { user_id: UserId("qa-lin".to_string()), notify_on_phase_change: true }];
        repo.save(&project).await.expect("resave");

        let found =
            repo.find_by_id(&ProjectId("proj-100".to_string())).await.expect("find").expect("row");
        assert_eq!(found.members.len(), 1);
        assert_eq!(found.members[0].user_id, UserId("qa-lin".to_string()));
    }

    #[tokio::test]
    async fn phase_write_keeps_status_and_progress_in_lockstep() {
        let pool = setup().await;
        let repo = SqlProjectRepository::new(pool);

        let mut project = sample_project("proj-100");
        repo.save(&project).await.expect("save");

        project.set_phase(ProjectPhase::Testing, Utc::now());
        repo.save(&project).await.expect("resave");

        let found =
            repo.find_by_id(&ProjectId("proj-100".to_string())).await.expect("find").expect("row");
        assert_eq!(found.current_phase, ProjectPhase::Testing);
        assert_eq!(found.progress_pct, 75);
    }
}
