use sqlx::Row;

use stagegate_core::domain::approval::{ApprovalId, ApprovalRequest};
use stagegate_core::domain::project::{Project, ProjectId, ProjectPhase};
use stagegate_core::domain::transition::{StageTransition, TransitionId, TransitionStatus};
use stagegate_core::domain::user::UserId;

use super::{
    parse_optional_timestamp, parse_timestamp, RepositoryError, ResolutionCommit,
    TransitionInsert, TransitionRepository,
};
use crate::DbPool;

const SELECT_TRANSITION: &str =
    "SELECT id, project_id, from_phase, to_phase, requested_by, approval_id, reason, status,
            decided_by, decided_at, created_at, updated_at
     FROM stage_transition";

pub struct SqlTransitionRepository {
    pool: DbPool,
}

impl SqlTransitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_phase(value: &str) -> Result<ProjectPhase, RepositoryError> {
    ProjectPhase::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown project phase: {value}")))
}

fn row_to_transition(row: &sqlx::sqlite::SqliteRow) -> Result<StageTransition, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let project_id: String =
        row.try_get("project_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let from_phase: String =
        row.try_get("from_phase").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let to_phase: String =
        row.try_get("to_phase").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requested_by: String =
        row.try_get("requested_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_id: String =
        row.try_get("approval_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let reason: Option<String> =
        row.try_get("reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_by: Option<String> =
        row.try_get("decided_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let status = TransitionStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown transition status: {status_str}"))
    })?;

    Ok(StageTransition {
        id: TransitionId(id),
        project_id: ProjectId(project_id),
        from_phase: parse_phase(&from_phase)?,
        to_phase: parse_phase(&to_phase)?,
        requested_by: UserId(requested_by),
        approval_id: ApprovalId(approval_id),
        reason,
        status,
        decided_by: decided_by.map(UserId),
        decided_at: parse_optional_timestamp("decided_at", decided_at)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl TransitionRepository for SqlTransitionRepository {
    async fn find_by_id(
        &self,
        id: &TransitionId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_TRANSITION} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_transition(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_approval(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_TRANSITION} WHERE approval_id = ?"))
            .bind(&approval_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_transition(r)?)),
            None => Ok(None),
        }
    }

    async fn find_pending_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let row =
            sqlx::query(&format!("{SELECT_TRANSITION} WHERE project_id = ? AND status = 'pending'"))
                .bind(&project_id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_transition(r)?)),
            None => Ok(None),
        }
    }

    async fn insert_pending(
        &self,
        transition: &StageTransition,
        gating_approval: &ApprovalRequest,
    ) -> Result<TransitionInsert, RepositoryError> {
        let attachments_json = serde_json::to_string(&gating_approval.attachments)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request (id, project_id, kind, title, description, requested_by,
                                           requested_to, priority, due_date, attachments_json,
                                           status, decided_by, decided_at, decision_notes,
                                           rejection_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&gating_approval.id.0)
        .bind(gating_approval.project_id.as_ref().map(|p| p.0.as_str()))
        .bind(gating_approval.kind.as_str())
        .bind(&gating_approval.title)
        .bind(&gating_approval.description)
        .bind(&gating_approval.requested_by.0)
        .bind(&gating_approval.requested_to.0)
        .bind(gating_approval.priority.as_str())
        .bind(gating_approval.due_date.map(|dt| dt.to_rfc3339()))
        .bind(&attachments_json)
        .bind(gating_approval.status.as_str())
        .bind(gating_approval.decided_by.as_ref().map(|u| u.0.as_str()))
        .bind(gating_approval.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(&gating_approval.decision_notes)
        .bind(&gating_approval.rejection_reason)
        .bind(gating_approval.created_at.to_rfc3339())
        .bind(gating_approval.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO stage_transition (id, project_id, from_phase, to_phase, requested_by,
                                           approval_id, reason, status, decided_by, decided_at,
                                           created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.project_id.0)
        .bind(transition.from_phase.as_str())
        .bind(transition.to_phase.as_str())
        .bind(&transition.requested_by.0)
        .bind(&transition.approval_id.0)
        .bind(&transition.reason)
        .bind(transition.status.as_str())
        .bind(transition.decided_by.as_ref().map(|u| u.0.as_str()))
        .bind(transition.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(transition.created_at.to_rfc3339())
        .bind(transition.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        // A pending-slot violation rolls back the approval insert as well.
        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(TransitionInsert::Inserted)
            }
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                drop(tx);
                Ok(TransitionInsert::PendingExists)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn commit_resolution(
        &self,
        transition: &StageTransition,
        phased_project: Option<&Project>,
    ) -> Result<ResolutionCommit, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Conditional write: only a still-pending row takes the resolution,
        // so racing decisions cannot both land.
        let result = sqlx::query(
            "UPDATE stage_transition
             SET status = ?, decided_by = ?, decided_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(transition.status.as_str())
        .bind(transition.decided_by.as_ref().map(|u| u.0.as_str()))
        .bind(transition.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(transition.updated_at.to_rfc3339())
        .bind(&transition.id.0)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return match self.find_by_id(&transition.id).await? {
                Some(current) => Ok(ResolutionCommit::AlreadyResolved(current)),
                None => Ok(ResolutionCommit::NotFound),
            };
        }

        if let Some(project) = phased_project {
            sqlx::query(
                "UPDATE project SET phase = ?, status = ?, progress_pct = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(project.current_phase.as_str())
            .bind(project.status.as_str())
            .bind(i64::from(project.progress_pct))
            .bind(project.updated_at.to_rfc3339())
            .bind(&project.id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ResolutionCommit::Applied)
    }
}
