use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use stagegate_core::audit::AuditAction;
use stagegate_core::authorization::AuthorizationGate;
use stagegate_core::domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, DecisionOutcome, NewApprovalRequest,
};
use stagegate_core::domain::project::Project;
use stagegate_core::domain::transition::TransitionStatus;
use stagegate_core::domain::user::Actor;
use stagegate_core::domain::EntityKind;
use stagegate_core::errors::WorkflowError;
use stagegate_db::repositories::{
    ApprovalRepository, DecisionCommit, ProjectRepository,
};

use crate::audit::AuditRecorder;
use crate::coordinator::StageTransitionCoordinator;
use crate::fanout::NotificationFanout;
use crate::storage_error;

/// Front door for approval requests. Validates and gates a request before it
/// is persisted, lands decisions through the conditional storage write, and
/// hands stage-transition approvals on to the coordinator.
#[derive(Clone)]
pub struct ApprovalLifecycle {
    approvals: Arc<dyn ApprovalRepository>,
    projects: Arc<dyn ProjectRepository>,
    gate: AuthorizationGate,
    audit: AuditRecorder,
    fanout: NotificationFanout,
    coordinator: Arc<StageTransitionCoordinator>,
}

impl ApprovalLifecycle {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        projects: Arc<dyn ProjectRepository>,
        gate: AuthorizationGate,
        audit: AuditRecorder,
        fanout: NotificationFanout,
        coordinator: Arc<StageTransitionCoordinator>,
    ) -> Self {
        Self { approvals, projects, gate, audit, fanout, coordinator }
    }

    /// Creates a pending approval request on behalf of `actor`.
    ///
    /// Stage-transition approvals are not created here; they only exist as
    /// the gating half of a transition opened through the coordinator.
    pub async fn create(
        &self,
        new: NewApprovalRequest,
        actor: &Actor,
    ) -> Result<ApprovalRequest, WorkflowError> {
        if new.requested_by != actor.id {
            return Err(WorkflowError::validation(
                "requested_by must match the acting user",
            ));
        }
        if new.kind == ApprovalKind::StageTransition {
            return Err(WorkflowError::validation(
                "stage transition approvals are opened via a transition request",
            ));
        }

        let gate = self.gate.can_create(actor, new.kind);
        if !gate.allowed {
            return Err(WorkflowError::forbidden(gate.reason));
        }

        let request = ApprovalRequest::create(new, Utc::now())?;

        if let Some(project_id) = &request.project_id {
            self.projects
                .find_by_id(project_id)
                .await
                .map_err(storage_error)?
                .ok_or_else(|| WorkflowError::not_found("project", project_id.as_str()))?;
        }

        self.approvals.insert(&request).await.map_err(storage_error)?;

        self.audit
            .record(
                EntityKind::Approval,
                request.id.as_str(),
                AuditAction::Create,
                &actor.id,
                &request,
            )
            .await;

        info!(
            event_name = "approval.created",
            approval_id = %request.id,
            kind = request.kind.as_str(),
            requested_by = %request.requested_by,
            requested_to = %request.requested_to,
            "approval request created"
        );

        self.fanout.request_created(&request).await;

        Ok(request)
    }

    /// Decides a pending approval. The storage write only lands on rows that
    /// are still pending, so of two concurrent decisions exactly one returns
    /// the decided request and the other a conflict.
    pub async fn decide(
        &self,
        id: &ApprovalId,
        actor: &Actor,
        outcome: DecisionOutcome,
        notes: Option<String>,
        rejection_reason: Option<String>,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let request = self
            .approvals
            .find_by_id(id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| WorkflowError::not_found("approval", id.as_str()))?;

        let gate = self.gate.can_decide(actor, &request);
        if !gate.allowed {
            return Err(WorkflowError::forbidden(gate.reason));
        }

        let record = request.prepare_decision(
            actor.id.clone(),
            outcome,
            notes,
            rejection_reason,
            Utc::now(),
        )?;

        let decided = match self
            .approvals
            .commit_decision(id, &record)
            .await
            .map_err(storage_error)?
        {
            DecisionCommit::Applied(updated) => updated,
            DecisionCommit::AlreadyDecided(current) => {
                return Err(WorkflowError::already_decided(id, current.status.as_str()));
            }
            DecisionCommit::NotFound => {
                return Err(WorkflowError::not_found("approval", id.as_str()));
            }
        };

        let action = match outcome {
            DecisionOutcome::Approve => AuditAction::Approve,
            DecisionOutcome::Reject => AuditAction::Reject,
        };
        self.audit
            .record(EntityKind::Approval, decided.id.as_str(), action, &actor.id, &decided)
            .await;

        info!(
            event_name = "approval.decided",
            approval_id = %decided.id,
            outcome = outcome.as_str(),
            decided_by = %actor.id,
            "approval decided"
        );

        let mut phase_changed = false;
        if decided.kind == ApprovalKind::StageTransition {
            // The decision is already committed; a transition failure here
            // must not turn it into an error. The next transition request for
            // the project settles the leftover pending slot.
            match self.coordinator.apply_decision(&decided).await {
                Ok(resolved) => {
                    phase_changed = resolved.status == TransitionStatus::Approved;
                }
                Err(error) => {
                    warn!(
                        event_name = "approval.transition_unresolved",
                        approval_id = %decided.id,
                        error = %error,
                        "decision committed but its transition was not resolved"
                    );
                }
            }
        }

        let project = self.project_for(&decided).await;
        self.fanout.decision_made(&decided, project.as_ref(), phase_changed).await;

        Ok(decided)
    }

    /// Project context for notification fan-out; a lookup failure only costs
    /// the phase-change notifications, never the decision.
    async fn project_for(&self, request: &ApprovalRequest) -> Option<Project> {
        let project_id = request.project_id.as_ref()?;
        match self.projects.find_by_id(project_id).await {
            Ok(project) => project,
            Err(error) => {
                warn!(
                    event_name = "approval.project_lookup_failed",
                    approval_id = %request.id,
                    project_id = %project_id,
                    error = %error,
                    "skipping project notifications"
                );
                None
            }
        }
    }
}
