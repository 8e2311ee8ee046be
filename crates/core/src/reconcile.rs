use std::collections::HashMap;

use crate::domain::approval::{ApprovalId, ApprovalRequest, DecisionRecord};
use crate::errors::WorkflowError;

/// Items remaining at or below this count after an optimistic removal
/// trigger a proactive refetch, so a nearly-drained page never renders
/// empty off stale pagination counts.
pub const DEFAULT_REFETCH_THRESHOLD: usize = 3;

/// What the caller must do after a reconciler operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum ReconcileAction {
    /// Local state is good; keep rendering it.
    Keep,
    /// Re-fetch the authoritative list before trusting local state again.
    Refetch,
}

struct PendingEcho {
    snapshot: ApprovalRequest,
    position: usize,
}

/// A client-side filtered view of pending approvals with an optimistic
/// update contract: decisions apply locally before the server confirms.
///
/// Confirmation keeps the optimistic state as authoritative. Failure of any
/// kind restores the pre-decision snapshot and demands a refetch; the same
/// decision is never retried, a retry after a lost race would only produce
/// an uninformative conflict.
pub struct WorkingSet {
    items: Vec<ApprovalRequest>,
    in_flight: HashMap<ApprovalId, PendingEcho>,
    refetch_threshold: usize,
    stale: bool,
}

impl WorkingSet {
    pub fn new(items: Vec<ApprovalRequest>) -> Self {
        Self::with_threshold(items, DEFAULT_REFETCH_THRESHOLD)
    }

    pub fn with_threshold(items: Vec<ApprovalRequest>, refetch_threshold: usize) -> Self {
        Self { items, in_flight: HashMap::new(), refetch_threshold, stale: false }
    }

    pub fn items(&self) -> &[ApprovalRequest] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True once any optimistic apply failed; cleared by [`Self::resync`].
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Applies a decision locally and removes the item from the filtered
    /// view, stashing the pre-decision snapshot for rollback. Returns the
    /// decided view for immediate rendering. At most one optimistic apply
    /// per request may be in flight.
    pub fn apply_optimistic(
        &mut self,
        id: &ApprovalId,
        record: DecisionRecord,
    ) -> Result<(ApprovalRequest, ReconcileAction), WorkflowError> {
        if self.in_flight.contains_key(id) {
            return Err(WorkflowError::conflict(format!(
                "an optimistic decision for `{id}` is already awaiting confirmation"
            )));
        }

        let position = self
            .items
            .iter()
            .position(|item| &item.id == id)
            .ok_or_else(|| WorkflowError::not_found("approval", id.as_str()))?;

        let snapshot = self.items.remove(position);
        let decided = snapshot.clone().with_decision(record);
        self.in_flight.insert(id.clone(), PendingEcho { snapshot, position });

        let action = if self.items.len() <= self.refetch_threshold {
            ReconcileAction::Refetch
        } else {
            ReconcileAction::Keep
        };
        Ok((decided, action))
    }

    /// Server confirmed the decision. The optimistic state stands; the
    /// stashed snapshot is discarded without consulting the server's copy.
    pub fn confirm(&mut self, id: &ApprovalId) -> Result<ReconcileAction, WorkflowError> {
        self.in_flight
            .remove(id)
            .ok_or_else(|| WorkflowError::not_found("in-flight decision", id.as_str()))?;
        Ok(ReconcileAction::Keep)
    }

    /// The decision failed (conflict, forbidden, vanished, or transport).
    /// Restores the snapshot at its old position and flags the whole set
    /// stale; the caller must refetch rather than retry.
    pub fn fail(&mut self, id: &ApprovalId) -> Result<ReconcileAction, WorkflowError> {
        let echo = self
            .in_flight
            .remove(id)
            .ok_or_else(|| WorkflowError::not_found("in-flight decision", id.as_str()))?;

        let position = echo.position.min(self.items.len());
        self.items.insert(position, echo.snapshot);
        self.stale = true;
        Ok(ReconcileAction::Refetch)
    }

    /// Replaces local state with a fresh authoritative listing, dropping
    /// any unresolved optimistic applies.
    pub fn resync(&mut self, items: Vec<ApprovalRequest>) {
        self.items = items;
        self.in_flight.clear();
        self.stale = false;
    }
}
