use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalId, ApprovalRequest};
use crate::domain::project::{Project, ProjectId};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("NTF-{}", &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestCreated,
    DecisionMade,
    PhaseChanged,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::DecisionMade => "decision_made",
            Self::PhaseChanged => "phase_changed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "request_created" => Some(Self::RequestCreated),
            "decision_made" => Some(Self::DecisionMade),
            "phase_changed" => Some(Self::PhaseChanged),
            _ => None,
        }
    }
}

/// A single delivery attempt target. Notifications are advisory; nothing in
/// the workflow ever blocks on one being stored or delivered.
///
/// `is_read` belongs to the recipient alone: it starts false and only flips
/// through a read-marking write scoped to that recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub sender_id: UserId,
    pub kind: NotificationKind,
    pub approval_id: Option<ApprovalId>,
    pub project_id: Option<ProjectId>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient: UserId,
        sender_id: UserId,
        kind: NotificationKind,
        approval_id: Option<ApprovalId>,
        project_id: Option<ProjectId>,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient,
            sender_id,
            kind,
            approval_id,
            project_id,
            message,
            is_read: false,
            created_at: now,
        }
    }
}

/// Recipients for a decision announcement: the requester first, then any
/// project members subscribed to phase changes when the decision moved the
/// project. Duplicates collapse to the first occurrence.
pub fn decision_recipients(
    request: &ApprovalRequest,
    project: Option<&Project>,
    phase_changed: bool,
) -> Vec<UserId> {
    let mut recipients = vec![request.requested_by.clone()];

    if phase_changed {
        if let Some(project) = project {
            for subscriber in project.phase_change_subscribers() {
                if !recipients.contains(subscriber) {
                    recipients.push(subscriber.clone());
                }
            }
        }
    }

    recipients
}
