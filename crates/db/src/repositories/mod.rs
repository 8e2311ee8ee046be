use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stagegate_core::audit::AuditLogEntry;
use stagegate_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, DecisionRecord, Priority,
};
use stagegate_core::domain::notification::{Notification, NotificationId};
use stagegate_core::domain::project::{Project, ProjectId};
use stagegate_core::domain::transition::{StageTransition, TransitionId};
use stagegate_core::domain::user::UserId;
use stagegate_core::domain::EntityKind;

pub mod approval;
pub mod audit;
pub mod memory;
pub mod notification;
pub mod project;
pub mod transition;

pub use approval::SqlApprovalRepository;
pub use audit::SqlAuditLogRepository;
pub use memory::InMemoryStore;
pub use notification::SqlNotificationRepository;
pub use project::SqlProjectRepository;
pub use transition::SqlTransitionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A stored timestamp that fails to parse is a decode error, never silently
/// substituted.
pub(crate) fn parse_timestamp(
    field: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(|e| {
        RepositoryError::Decode(format!("invalid {field} timestamp `{value}`: {e}"))
    })
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(field, &raw)).transpose()
}

/// Outcome of the conditional decision write. The update only touches rows
/// still in `pending`, so exactly one of two racing decisions observes
/// `Applied` and the other observes `AlreadyDecided`.
#[derive(Clone, Debug)]
pub enum DecisionCommit {
    Applied(ApprovalRequest),
    AlreadyDecided(ApprovalRequest),
    NotFound,
}

/// Outcome of inserting a transition while another one may already hold the
/// project's pending slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionInsert {
    Inserted,
    PendingExists,
}

/// Outcome of resolving a pending transition together with the project phase
/// write. Both rows change in one transaction or neither does.
#[derive(Clone, Debug)]
pub enum ResolutionCommit {
    Applied,
    AlreadyResolved(StageTransition),
    NotFound,
}

/// Sort key for approval listings; ties break on id, descending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApprovalSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Priority,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// AND-combined listing constraints. `visible_to` narrows the result to
/// rows that user is a party to (requester, reviewer, decider) or a member
/// of the owning project; leave it `None` for administrative reads. The
/// page window (`limit`/`offset`) and sort apply at the storage layer so
/// `count` stays truthful for any page.
#[derive(Clone, Debug, Default)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub kind: Option<ApprovalKind>,
    pub project_id: Option<ProjectId>,
    pub requested_to: Option<UserId>,
    pub priority: Option<Priority>,
    pub visible_to: Option<UserId>,
    pub sort: ApprovalSort,
    pub order: SortOrder,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError>;

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Total rows matching `filter`, ignoring its page window.
    async fn count(&self, filter: &ApprovalFilter) -> Result<u64, RepositoryError>;

    /// Apply a decision if and only if the stored row is still pending.
    async fn commit_decision(
        &self,
        id: &ApprovalId,
        record: &DecisionRecord,
    ) -> Result<DecisionCommit, RepositoryError>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    async fn save(&self, project: &Project) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TransitionRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &TransitionId,
    ) -> Result<Option<StageTransition>, RepositoryError>;

    async fn find_by_approval(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<StageTransition>, RepositoryError>;

    async fn find_pending_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<StageTransition>, RepositoryError>;

    /// Insert a pending transition together with its gating approval in one
    /// transaction. Reports `PendingExists` when the project already has a
    /// pending transition instead of surfacing the unique-index violation;
    /// in that case the approval is not inserted either.
    async fn insert_pending(
        &self,
        transition: &StageTransition,
        gating_approval: &ApprovalRequest,
    ) -> Result<TransitionInsert, RepositoryError>;

    /// Persist a resolved transition and, when the resolution changes the
    /// project phase, the new project row in the same transaction.
    async fn commit_resolution(
        &self,
        transition: &StageTransition,
        phased_project: Option<&Project>,
    ) -> Result<ResolutionCommit, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError>;

    async fn latest_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditLogEntry>, RepositoryError>;

    async fn list_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn append(&self, notification: &Notification) -> Result<(), RepositoryError>;

    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError>;

    /// Flags a notification as read. Read state belongs to the recipient:
    /// the write only lands when `recipient` matches the stored row, and
    /// the returned bool reports whether it did.
    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<bool, RepositoryError>;
}
