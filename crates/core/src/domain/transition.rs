use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::project::{PhaseStep, Project, ProjectPhase};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

impl TransitionId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("TRN-{}", &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Pending,
    Approved,
    Rejected,
}

impl TransitionStatus {
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

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A proposed move between adjacent project phases, gated on an approval.
/// The record stays pending until its approval is decided; approval commits
/// the phase change, rejection leaves the project where it was.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: TransitionId,
    pub project_id: crate::domain::project::ProjectId,
    pub from_phase: ProjectPhase,
    pub to_phase: ProjectPhase,
    pub requested_by: UserId,
    pub approval_id: ApprovalId,
    pub reason: Option<String>,
    pub status: TransitionStatus,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StageTransition {
    /// Builds a pending transition from the project's current phase.
    /// Only single-step moves are accepted, forward or backward.
    pub fn request(
        project: &Project,
        to_phase: ProjectPhase,
        requested_by: UserId,
        approval_id: ApprovalId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        let from_phase = project.current_phase;
        if from_phase.step_to(to_phase).is_none() {
            return Err(WorkflowError::validation(format!(
                "cannot move project from `{}` to `{}`: phases must be adjacent",
                from_phase.as_str(),
                to_phase.as_str()
            )));
        }

        Ok(Self {
            id: TransitionId::generate(),
            project_id: project.id.clone(),
            from_phase,
            to_phase,
            requested_by,
            approval_id,
            reason,
            status: TransitionStatus::Pending,
            decided_by: None,
            decided_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Direction of the move. `request` guarantees adjacency, so this
    /// cannot fail on a stored record.
    pub fn step(&self) -> Option<PhaseStep> {
        self.from_phase.step_to(self.to_phase)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransitionStatus::Pending
    }

    /// Marks the transition decided. A second resolution is a conflict.
    pub fn resolve(
        &mut self,
        approved: bool,
        decided_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::conflict(format!(
                "transition `{}` was already decided ({})",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = if approved {
            TransitionStatus::Approved
        } else {
            TransitionStatus::Rejected
        };
        self.decided_by = Some(decided_by);
        self.decided_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
