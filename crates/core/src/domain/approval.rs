use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::project::ProjectId;
use crate::domain::user::UserId;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("APR-{}", &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Design,
    Deliverable,
    StageTransition,
    Generic,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Deliverable => "deliverable",
            Self::StageTransition => "stage_transition",
            Self::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "design" => Some(Self::Design),
            "deliverable" => Some(Self::Deliverable),
            "stage_transition" => Some(Self::StageTransition),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Every kind except `Generic` is anchored to a project record.
    pub fn requires_project(&self) -> bool {
        !matches!(self, Self::Generic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Approved and Rejected are terminal; no path leads out of either.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub kind: String,
    pub url: String,
    pub size_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    pub fn terminal_status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// The fields a decision writes in one shot. Produced by
/// [`ApprovalRequest::prepare_decision`] and applied by the repository's
/// conditional update so validation happens before any storage round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub status: ApprovalStatus,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
    pub decision_notes: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Caller-supplied fields for a new request; everything else is derived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub project_id: Option<ProjectId>,
    pub kind: ApprovalKind,
    pub title: String,
    pub description: Option<String>,
    pub requested_by: UserId,
    pub requested_to: UserId,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub project_id: Option<ProjectId>,
    pub kind: ApprovalKind,
    pub title: String,
    pub description: Option<String>,
    pub requested_by: UserId,
    pub requested_to: UserId,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
    pub status: ApprovalStatus,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Builds a pending request, rejecting malformed input before it ever
    /// reaches storage. The reviewer must differ from the requester.
    pub fn create(new: NewApprovalRequest, now: DateTime<Utc>) -> Result<Self, WorkflowError> {
        if new.title.trim().is_empty() {
            return Err(WorkflowError::validation("approval title must not be blank"));
        }

        if new.requested_by == new.requested_to {
            return Err(WorkflowError::validation(
                "requester and reviewer must be different users",
            ));
        }

        if new.kind.requires_project() && new.project_id.is_none() {
            return Err(WorkflowError::validation(format!(
                "approval kind `{}` requires a project",
                new.kind.as_str()
            )));
        }

        Ok(Self {
            id: ApprovalId::generate(),
            project_id: new.project_id,
            kind: new.kind,
            title: new.title,
            description: new.description,
            requested_by: new.requested_by,
            requested_to: new.requested_to,
            priority: new.priority,
            due_date: new.due_date,
            attachments: new.attachments,
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            decision_notes: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validates a decision against the in-memory snapshot and returns the
    /// record to commit. The snapshot check is a fast path only; the
    /// repository's conditional update on the pending status is what
    /// actually serializes concurrent deciders.
    pub fn prepare_decision(
        &self,
        decided_by: UserId,
        outcome: DecisionOutcome,
        notes: Option<String>,
        rejection_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionRecord, WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::already_decided(&self.id, self.status.as_str()));
        }

        if outcome == DecisionOutcome::Reject
            && rejection_reason.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(WorkflowError::validation(
                "rejection requires a non-empty reason",
            ));
        }

        Ok(DecisionRecord {
            status: outcome.terminal_status(),
            decided_by,
            decided_at: now,
            decision_notes: notes,
            rejection_reason: match outcome {
                DecisionOutcome::Reject => rejection_reason,
                DecisionOutcome::Approve => None,
            },
        })
    }

    /// Applies a committed decision to the snapshot.
    pub fn with_decision(mut self, record: DecisionRecord) -> Self {
        self.status = record.status;
        self.decided_by = Some(record.decided_by);
        self.decided_at = Some(record.decided_at);
        self.decision_notes = record.decision_notes;
        self.rejection_reason = record.rejection_reason;
        self.updated_at = record.decided_at;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::project::ProjectId;
    use crate::domain::user::UserId;
    use crate::errors::WorkflowError;

    use super::{
        ApprovalKind, ApprovalRequest, ApprovalStatus, DecisionOutcome, NewApprovalRequest,
        Priority,
    };

    fn new_request(kind: ApprovalKind) -> NewApprovalRequest {
        NewApprovalRequest {
            project_id: Some(ProjectId("proj-1".to_string())),
            kind,
            title: "Homepage design sign-off".to_string(),
            description: None,
            requested_by: UserId("lead-1".to_string()),
            requested_to: UserId("client-1".to_string()),
            priority: Priority::Medium,
            due_date: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn create_starts_pending_with_generated_id() {
        let request =
            ApprovalRequest::create(new_request(ApprovalKind::Design), Utc::now()).expect("create");

        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(request.id.as_str().starts_with("APR-"));
        assert!(request.decided_by.is_none());
    }

    #[test]
    fn create_rejects_self_approval() {
        let mut new = new_request(ApprovalKind::Design);
        new.requested_to = new.requested_by.clone();

        let error = ApprovalRequest::create(new, Utc::now()).expect_err("self approval");
        assert!(matches!(error, WorkflowError::Validation { .. }));
    }

    #[test]
    fn create_rejects_blank_title() {
        let mut new = new_request(ApprovalKind::Design);
        new.title = "   ".to_string();

        let error = ApprovalRequest::create(new, Utc::now()).expect_err("blank title");
        assert!(matches!(error, WorkflowError::Validation { .. }));
    }

    #[test]
    fn non_generic_kinds_require_a_project() {
        let mut new = new_request(ApprovalKind::Deliverable);
        new.project_id = None;

        let error = ApprovalRequest::create(new, Utc::now()).expect_err("missing project");
        assert!(matches!(error, WorkflowError::Validation { .. }));

        let mut generic = new_request(ApprovalKind::Generic);
        generic.project_id = None;
        ApprovalRequest::create(generic, Utc::now()).expect("generic without project");
    }

    #[test]
    fn pending_only_moves_to_approved_or_rejected() {
        assert!(ApprovalStatus::Pending.can_transition_to(ApprovalStatus::Approved));
        assert!(ApprovalStatus::Pending.can_transition_to(ApprovalStatus::Rejected));
        assert!(!ApprovalStatus::Approved.can_transition_to(ApprovalStatus::Rejected));
        assert!(!ApprovalStatus::Rejected.can_transition_to(ApprovalStatus::Approved));
        assert!(!ApprovalStatus::Approved.can_transition_to(ApprovalStatus::Pending));
    }

    #[test]
    fn approve_decision_applies_terminal_fields() {
        let request =
            ApprovalRequest::create(new_request(ApprovalKind::Design), Utc::now()).expect("create");
        let reviewer = request.requested_to.clone();

        let record = request
            .prepare_decision(
                reviewer.clone(),
                DecisionOutcome::Approve,
                Some("looks good".to_string()),
                None,
                Utc::now(),
            )
            .expect("approve");
        let decided = request.with_decision(record);

        assert_eq!(decided.status, ApprovalStatus::Approved);
        assert_eq!(decided.decided_by, Some(reviewer));
        assert!(decided.decided_at.is_some());
        assert!(decided.rejection_reason.is_none());
    }

    #[test]
    fn reject_requires_a_reason() {
        let request =
            ApprovalRequest::create(new_request(ApprovalKind::Design), Utc::now()).expect("create");

        let error = request
            .prepare_decision(
                request.requested_to.clone(),
                DecisionOutcome::Reject,
                None,
                Some("  ".to_string()),
                Utc::now(),
            )
            .expect_err("blank reason");
        assert!(matches!(error, WorkflowError::Validation { .. }));

        let record = request
            .prepare_decision(
                request.requested_to.clone(),
                DecisionOutcome::Reject,
                None,
                Some("missing responsive layouts".to_string()),
                Utc::now(),
            )
            .expect("reject with reason");
        assert_eq!(record.status, ApprovalStatus::Rejected);
        assert_eq!(record.rejection_reason.as_deref(), Some("missing responsive layouts"));
    }

    #[test]
    fn second_decision_on_terminal_request_conflicts() {
        let request =
            ApprovalRequest::create(new_request(ApprovalKind::Design), Utc::now()).expect("create");
        let record = request
            .prepare_decision(
                request.requested_to.clone(),
                DecisionOutcome::Approve,
                None,
                None,
                Utc::now(),
            )
            .expect("first decision");
        let decided = request.with_decision(record);

        let error = decided
            .prepare_decision(
                decided.requested_to.clone(),
                DecisionOutcome::Reject,
                None,
                Some("changed my mind".to_string()),
                Utc::now(),
            )
            .expect_err("second decision");
        assert!(matches!(error, WorkflowError::Conflict { .. }));
    }
}
