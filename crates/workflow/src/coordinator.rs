use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use stagegate_core::audit::AuditAction;
use stagegate_core::authorization::AuthorizationGate;
use stagegate_core::domain::approval::{
    ApprovalKind, ApprovalRequest, ApprovalStatus, NewApprovalRequest, Priority,
};
use stagegate_core::domain::project::{PhaseStep, ProjectId, ProjectPhase};
use stagegate_core::domain::transition::StageTransition;
use stagegate_core::domain::user::{Actor, UserId};
use stagegate_core::domain::EntityKind;
use stagegate_core::errors::WorkflowError;
use stagegate_db::repositories::{
    ApprovalRepository, ProjectRepository, ResolutionCommit, TransitionInsert,
    TransitionRepository,
};

use crate::audit::AuditRecorder;
use crate::fanout::NotificationFanout;
use crate::storage_error;

/// Owns the project phase: every phase change goes through a pending
/// transition here, gated on an approval, and lands via the repository's
/// transactional resolution. Nothing else writes `current_phase`.
#[derive(Clone)]
pub struct StageTransitionCoordinator {
    projects: Arc<dyn ProjectRepository>,
    transitions: Arc<dyn TransitionRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    gate: AuthorizationGate,
    audit: AuditRecorder,
    fanout: NotificationFanout,
}

impl StageTransitionCoordinator {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        transitions: Arc<dyn TransitionRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        gate: AuthorizationGate,
        audit: AuditRecorder,
        fanout: NotificationFanout,
    ) -> Self {
        Self { projects, transitions, approvals, gate, audit, fanout }
    }

    /// Opens a pending transition to `target` together with its gating
    /// approval (assigned to `reviewer`), both in one storage transaction.
    /// `target` must be the immediate successor or predecessor of the
    /// project's current phase, and a project holds at most one pending
    /// transition at a time.
    pub async fn request_advance(
        &self,
        project_id: &ProjectId,
        target: ProjectPhase,
        reviewer: UserId,
        reason: Option<String>,
        actor: &Actor,
    ) -> Result<StageTransition, WorkflowError> {
        let mut project = self
            .projects
            .find_by_id(project_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| WorkflowError::not_found("project", project_id.as_str()))?;

        if let Some(pending) = self
            .transitions
            .find_pending_for_project(project_id)
            .await
            .map_err(storage_error)?
        {
            let gating = self
                .approvals
                .find_by_id(&pending.approval_id)
                .await
                .map_err(storage_error)?;
            match gating {
                // A failure between the decision commit and the transition
                // resolution leaves the slot held by an already-decided
                // approval. Settle it now instead of blocking the project.
                Some(request) if !request.is_pending() => {
                    let settled = self.apply_decision(&request).await?;
                    info!(
                        event_name = "transition.backfilled",
                        transition_id = %settled.id,
                        project_id = %project_id,
                        status = settled.status.as_str(),
                        approval_id = %request.id,
                        "settled a pending transition whose approval was already decided"
                    );
                    project = self
                        .projects
                        .find_by_id(project_id)
                        .await
                        .map_err(storage_error)?
                        .ok_or_else(|| {
                            WorkflowError::not_found("project", project_id.as_str())
                        })?;
                }
                _ => {
                    return Err(WorkflowError::conflict(format!(
                        "project `{project_id}` already has a pending transition `{}`",
                        pending.id
                    )));
                }
            }
        }

        let now = Utc::now();
        let approval = ApprovalRequest::create(
            NewApprovalRequest {
                project_id: Some(project.id.clone()),
                kind: ApprovalKind::StageTransition,
                title: format!(
                    "Move `{}` from {} to {}",
                    project.name,
                    project.current_phase.as_str(),
                    target.as_str()
                ),
                description: reason.clone(),
                requested_by: actor.id.clone(),
                requested_to: reviewer,
                priority: Priority::Medium,
                due_date: None,
                attachments: Vec::new(),
            },
            now,
        )?;

        let transition = StageTransition::request(
            &project,
            target,
            actor.id.clone(),
            approval.id.clone(),
            reason,
            now,
        )?;

        let gate = self.gate.can_create(actor, ApprovalKind::StageTransition);
        if !gate.allowed {
            return Err(WorkflowError::forbidden(gate.reason));
        }

        match self
            .transitions
            .insert_pending(&transition, &approval)
            .await
            .map_err(storage_error)?
        {
            TransitionInsert::Inserted => {}
            TransitionInsert::PendingExists => {
                // Lost the race for the pending slot between the pre-check
                // and the insert.
                return Err(WorkflowError::conflict(format!(
                    "project `{project_id}` already has a pending transition"
                )));
            }
        }

        self.audit
            .record(
                EntityKind::StageTransition,
                transition.id.as_str(),
                AuditAction::Create,
                &actor.id,
                &transition,
            )
            .await;

        info!(
            event_name = "transition.requested",
            transition_id = %transition.id,
            project_id = %project_id,
            from_phase = transition.from_phase.as_str(),
            to_phase = transition.to_phase.as_str(),
            approval_id = %approval.id,
            requested_by = %actor.id,
            "stage transition opened"
        );

        self.fanout.request_created(&approval).await;

        Ok(transition)
    }

    /// Applies a terminal approval decision to its transition. Approval
    /// resolves the transition and moves the project phase in the same
    /// transaction; rejection resolves the transition only, leaving the
    /// project eligible for a new request.
    pub async fn apply_decision(
        &self,
        request: &ApprovalRequest,
    ) -> Result<StageTransition, WorkflowError> {
        let transition = self
            .transitions
            .find_by_approval(&request.id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| WorkflowError::not_found("stage transition", request.id.as_str()))?;

        let decided_by = request.decided_by.clone().ok_or_else(|| {
            WorkflowError::validation(format!(
                "approval `{}` carries no decision to apply",
                request.id
            ))
        })?;
        let decided_at = request.decided_at.unwrap_or_else(Utc::now);
        let approved = request.status == ApprovalStatus::Approved;

        let mut resolved = transition.clone();
        resolved.resolve(approved, decided_by.clone(), decided_at)?;

        let phased = if approved {
            let mut project = self
                .projects
                .find_by_id(&transition.project_id)
                .await
                .map_err(storage_error)?
                .ok_or_else(|| {
                    WorkflowError::not_found("project", transition.project_id.as_str())
                })?;
            project.set_phase(transition.to_phase, decided_at);
            Some(project)
        } else {
            None
        };

        match self
            .transitions
            .commit_resolution(&resolved, phased.as_ref())
            .await
            .map_err(storage_error)?
        {
            ResolutionCommit::Applied => {}
            ResolutionCommit::AlreadyResolved(current) => {
                return Err(WorkflowError::conflict(format!(
                    "transition `{}` was already decided ({})",
                    current.id,
                    current.status.as_str()
                )));
            }
            ResolutionCommit::NotFound => {
                return Err(WorkflowError::not_found(
                    "stage transition",
                    resolved.id.as_str(),
                ));
            }
        }

        let action = if approved {
            match resolved.step() {
                Some(PhaseStep::Rollback) => AuditAction::PhaseRollback,
                _ => AuditAction::PhaseAdvance,
            }
        } else {
            AuditAction::Reject
        };
        self.audit
            .record(
                EntityKind::StageTransition,
                resolved.id.as_str(),
                action,
                &decided_by,
                &resolved,
            )
            .await;

        info!(
            event_name = "transition.resolved",
            transition_id = %resolved.id,
            project_id = %resolved.project_id,
            status = resolved.status.as_str(),
            to_phase = resolved.to_phase.as_str(),
            decided_by = %decided_by,
            "stage transition resolved"
        );

        Ok(resolved)
    }
}
