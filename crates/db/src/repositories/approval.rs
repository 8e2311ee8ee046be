use sqlx::Row;

use stagegate_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Attachment, DecisionRecord,
    Priority,
};
use stagegate_core::domain::project::ProjectId;
use stagegate_core::domain::user::UserId;

use super::{
    parse_optional_timestamp, parse_timestamp, ApprovalFilter, ApprovalRepository, ApprovalSort,
    DecisionCommit, RepositoryError, SortOrder,
};
use crate::DbPool;

const SELECT_APPROVAL: &str =
    "SELECT id, project_id, kind, title, description, requested_by, requested_to, priority,
            due_date, attachments_json, status, decided_by, decided_at, decision_notes,
            rejection_reason, created_at, updated_at
     FROM approval_request";

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 500;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

/// WHERE clause plus its positional binds, shared by `list` and `count` so
/// the reported total always matches the rows the page window walks.
fn filter_clause(filter: &ApprovalFilter) -> (String, Vec<String>) {
    let mut clause = String::from("WHERE 1 = 1");
    let mut binds: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        clause.push_str(" AND status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(kind) = filter.kind {
        clause.push_str(" AND kind = ?");
        binds.push(kind.as_str().to_string());
    }
    if let Some(project_id) = &filter.project_id {
        clause.push_str(" AND project_id = ?");
        binds.push(project_id.0.clone());
    }
    if let Some(requested_to) = &filter.requested_to {
        clause.push_str(" AND requested_to = ?");
        binds.push(requested_to.0.clone());
    }
    if let Some(priority) = filter.priority {
        clause.push_str(" AND priority = ?");
        binds.push(priority.as_str().to_string());
    }
    if let Some(viewer) = &filter.visible_to {
        // Mirrors the view rule: a party to the request or a member of the
        // owning project.
        clause.push_str(
            " AND (requested_by = ? OR requested_to = ? OR decided_by = ? \
             OR project_id IN (SELECT project_id FROM project_member WHERE user_id = ?))",
        );
        for _ in 0..4 {
            binds.push(viewer.0.clone());
        }
    }

    (clause, binds)
}

fn order_clause(sort: ApprovalSort, order: SortOrder) -> String {
    let key = match sort {
        ApprovalSort::CreatedAt => "created_at".to_string(),
        ApprovalSort::UpdatedAt => "updated_at".to_string(),
        ApprovalSort::DueDate => "due_date".to_string(),
        // Stored as names; rank them so the sort is by urgency, not spelling.
        ApprovalSort::Priority => {
            "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 END"
                .to_string()
        }
    };
    let direction = match order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    format!("{key} {direction}, id DESC")
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let project_id: Option<String> = decode(row.try_get("project_id"))?;
    let kind_str: String = decode(row.try_get("kind"))?;
    let title: String = decode(row.try_get("title"))?;
    let description: Option<String> = decode(row.try_get("description"))?;
    let requested_by: String = decode(row.try_get("requested_by"))?;
    let requested_to: String = decode(row.try_get("requested_to"))?;
    let priority_str: String = decode(row.try_get("priority"))?;
    let due_date: Option<String> = decode(row.try_get("due_date"))?;
    let attachments_json: String = decode(row.try_get("attachments_json"))?;
    let status_str: String = decode(row.try_get("status"))?;
    let decided_by: Option<String> = decode(row.try_get("decided_by"))?;
    let decided_at: Option<String> = decode(row.try_get("decided_at"))?;
    let decision_notes: Option<String> = decode(row.try_get("decision_notes"))?;
    let rejection_reason: Option<String> = decode(row.try_get("rejection_reason"))?;
    let created_at: String = decode(row.try_get("created_at"))?;
    let updated_at: String = decode(row.try_get("updated_at"))?;

    let kind = ApprovalKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval kind: {kind_str}")))?;
    let status = ApprovalStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status: {status_str}")))?;
    let priority = Priority::parse(&priority_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority: {priority_str}")))?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_json)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalRequest {
        id: ApprovalId(id),
        project_id: project_id.map(ProjectId),
        kind,
        title,
        description,
        requested_by: UserId(requested_by),
        requested_to: UserId(requested_to),
        priority,
        due_date: parse_optional_timestamp("due_date", due_date)?,
        attachments,
        status,
        decided_by: decided_by.map(UserId),
        decided_at: parse_optional_timestamp("decided_at", decided_at)?,
        decision_notes,
        rejection_reason,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_APPROVAL} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let attachments_json = serde_json::to_string(&request.attachments)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO approval_request (id, project_id, kind, title, description, requested_by,
                                           requested_to, priority, due_date, attachments_json,
                                           status, decided_by, decided_at, decision_notes,
                                           rejection_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(request.project_id.as_ref().map(|p| p.0.as_str()))
        .bind(request.kind.as_str())
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.requested_by.0)
        .bind(&request.requested_to.0)
        .bind(request.priority.as_str())
        .bind(request.due_date.map(|dt| dt.to_rfc3339()))
        .bind(&attachments_json)
        .bind(request.status.as_str())
        .bind(request.decided_by.as_ref().map(|u| u.0.as_str()))
        .bind(request.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&request.decision_notes)
        .bind(&request.rejection_reason)
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let (where_clause, binds) = filter_clause(filter);
        let sql = format!(
            "{SELECT_APPROVAL} {where_clause} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(filter.sort, filter.order)
        );

        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .bind(limit)
            .bind(filter.offset.unwrap_or(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()
    }

    async fn count(&self, filter: &ApprovalFilter) -> Result<u64, RepositoryError> {
        let (where_clause, binds) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM approval_request {where_clause}");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let total = query.fetch_one(&self.pool).await?;

        Ok(total.max(0) as u64)
    }

    async fn commit_decision(
        &self,
        id: &ApprovalId,
        record: &DecisionRecord,
    ) -> Result<DecisionCommit, RepositoryError> {
        // Conditional write: the status guard in the WHERE clause is the only
        // protection against two decisions landing on the same request.
        let result = sqlx::query(
            "UPDATE approval_request
             SET status = ?, decided_by = ?, decided_at = ?, decision_notes = ?,
                 rejection_reason = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(record.status.as_str())
        .bind(&record.decided_by.0)
        .bind(record.decided_at.to_rfc3339())
        .bind(&record.decision_notes)
        .bind(&record.rejection_reason)
        .bind(record.decided_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        match self.find_by_id(id).await? {
            Some(request) if result.rows_affected() == 1 => Ok(DecisionCommit::Applied(request)),
            Some(request) => Ok(DecisionCommit::AlreadyDecided(request)),
            None => Ok(DecisionCommit::NotFound),
        }
    }
}
