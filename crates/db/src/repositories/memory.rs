use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use stagegate_core::audit::AuditLogEntry;
use stagegate_core::domain::approval::{ApprovalId, ApprovalRequest, DecisionRecord};
use stagegate_core::domain::notification::{Notification, NotificationId};
use stagegate_core::domain::project::{Project, ProjectId};
use stagegate_core::domain::transition::{StageTransition, TransitionId, TransitionStatus};
use stagegate_core::domain::user::UserId;
use stagegate_core::domain::EntityKind;

use super::{
    ApprovalFilter, ApprovalRepository, ApprovalSort, AuditLogRepository, DecisionCommit,
    NotificationRepository, ProjectRepository, RepositoryError, ResolutionCommit, SortOrder,
    TransitionInsert, TransitionRepository,
};

#[derive(Default)]
struct StoreInner {
    approvals: HashMap<String, ApprovalRequest>,
    projects: HashMap<String, Project>,
    transitions: HashMap<String, StageTransition>,
    audit_entries: Vec<AuditLogEntry>,
    notifications: Vec<Notification>,
}

/// Test double for the whole persistence layer. One lock guards all entities
/// so the transition-plus-project write stays atomic, matching the SQL
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(inner: &StoreInner, request: &ApprovalRequest, filter: &ApprovalFilter) -> bool {
    if let Some(status) = filter.status {
        if request.status != status {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if request.kind != kind {
            return false;
        }
    }
    if let Some(project_id) = &filter.project_id {
        if request.project_id.as_ref() != Some(project_id) {
            return false;
        }
    }
    if let Some(requested_to) = &filter.requested_to {
        if &request.requested_to != requested_to {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if request.priority != priority {
            return false;
        }
    }
    if let Some(viewer) = &filter.visible_to {
        let party = &request.requested_by == viewer
            || &request.requested_to == viewer
            || request.decided_by.as_ref() == Some(viewer);
        let member = request
            .project_id
            .as_ref()
            .and_then(|id| inner.projects.get(&id.0))
            .is_some_and(|project| project.is_member(viewer));
        if !party && !member {
            return false;
        }
    }
    true
}

// Ties break on id descending, like the SQL ORDER BY.
fn sort_approvals(items: &mut [ApprovalRequest], sort: ApprovalSort, order: SortOrder) {
    items.sort_by(|a, b| {
        let by_key = match sort {
            ApprovalSort::CreatedAt => a.created_at.cmp(&b.created_at),
            ApprovalSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            ApprovalSort::DueDate => a.due_date.cmp(&b.due_date),
            ApprovalSort::Priority => a.priority.cmp(&b.priority),
        };
        let by_key = match order {
            SortOrder::Ascending => by_key,
            SortOrder::Descending => by_key.reverse(),
        };
        by_key.then_with(|| b.id.0.cmp(&a.id.0))
    });
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.approvals.get(&id.0).cloned())
    }

    async fn insert(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.approvals.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut items: Vec<ApprovalRequest> = inner
            .approvals
            .values()
            .filter(|request| matches_filter(&inner, request, filter))
            .cloned()
            .collect();
        sort_approvals(&mut items, filter.sort, filter.order);
        let items = items
            .into_iter()
            .skip(filter.offset.unwrap_or(0) as usize)
            .take(filter.limit.unwrap_or(100) as usize)
            .collect();
        Ok(items)
    }

    async fn count(&self, filter: &ApprovalFilter) -> Result<u64, RepositoryError> {
        let inner = self.inner.read().await;
        let total = inner
            .approvals
            .values()
            .filter(|request| matches_filter(&inner, request, filter))
            .count();
        Ok(total as u64)
    }

    async fn commit_decision(
        &self,
        id: &ApprovalId,
        record: &DecisionRecord,
    ) -> Result<DecisionCommit, RepositoryError> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.approvals.get(&id.0) else {
            return Ok(DecisionCommit::NotFound);
        };
        if existing.status.is_terminal() {
            return Ok(DecisionCommit::AlreadyDecided(existing.clone()));
        }
        let updated = existing.clone().with_decision(record.clone());
        inner.approvals.insert(id.0.clone(), updated.clone());
        Ok(DecisionCommit::Applied(updated))
    }
}

#[async_trait::async_trait]
impl ProjectRepository for InMemoryStore {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.projects.get(&id.0).cloned())
    }

    async fn save(&self, project: &Project) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.projects.insert(project.id.0.clone(), project.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl TransitionRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &TransitionId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.transitions.get(&id.0).cloned())
    }

    async fn find_by_approval(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.transitions.values().find(|t| &t.approval_id == approval_id).cloned())
    }

    async fn find_pending_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<StageTransition>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transitions
            .values()
            .find(|t| &t.project_id == project_id && t.status == TransitionStatus::Pending)
            .cloned())
    }

    async fn insert_pending(
        &self,
        transition: &StageTransition,
        gating_approval: &ApprovalRequest,
    ) -> Result<TransitionInsert, RepositoryError> {
        let mut inner = self.inner.write().await;
        let occupied = inner.transitions.values().any(|t| {
            t.project_id == transition.project_id && t.status == TransitionStatus::Pending
        });
        if occupied {
            return Ok(TransitionInsert::PendingExists);
        }
        inner.approvals.insert(gating_approval.id.0.clone(), gating_approval.clone());
        inner.transitions.insert(transition.id.0.clone(), transition.clone());
        Ok(TransitionInsert::Inserted)
    }

    async fn commit_resolution(
        &self,
        transition: &StageTransition,
        phased_project: Option<&Project>,
    ) -> Result<ResolutionCommit, RepositoryError> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.transitions.get(&transition.id.0) else {
            return Ok(ResolutionCommit::NotFound);
        };
        if existing.status.is_terminal() {
            return Ok(ResolutionCommit::AlreadyResolved(existing.clone()));
        }
        inner.transitions.insert(transition.id.0.clone(), transition.clone());
        if let Some(project) = phased_project {
            inner.projects.insert(project.id.0.clone(), project.clone());
        }
        Ok(ResolutionCommit::Applied)
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.audit_entries.push(entry.clone());
        Ok(())
    }

    async fn latest_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditLogEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit_entries
            .iter()
            .filter(|e| e.entity_kind == entity_kind && e.entity_id == entity_id)
            .max_by_key(|e| e.seq)
            .cloned())
    }

    async fn list_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<AuditLogEntry> = inner
            .audit_entries
            .iter()
            .filter(|e| e.entity_kind == entity_kind && e.entity_id == entity_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryStore {
    async fn append(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut items: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| &n.recipient == recipient)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        match inner
            .notifications
            .iter_mut()
            .find(|n| &n.id == id && &n.recipient == recipient)
        {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
