use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info};

use stagegate_core::domain::approval::{ApprovalId, ApprovalRequest, DecisionOutcome};
use stagegate_core::domain::user::Actor;
use stagegate_core::errors::{ErrorKind, WorkflowError};

use crate::lifecycle::ApprovalLifecycle;

/// One failed item of a batch, reduced to its id and failure kind. The batch
/// report never aborts on individual failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: ApprovalId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-item outcome of a batch decision run. `succeeded` and `failed`
/// together account for every submitted id exactly once.
#[derive(Clone, Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ApprovalId>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} processed", self.succeeded.len(), self.total())
    }
}

/// Applies one decision to many approvals, each through the same single-item
/// path the lifecycle uses. Items run concurrently under a semaphore and
/// fail independently; an already-decided id simply reports a conflict.
#[derive(Clone)]
pub struct BatchDecisionProcessor {
    lifecycle: Arc<ApprovalLifecycle>,
    concurrency: usize,
}

impl BatchDecisionProcessor {
    pub fn new(lifecycle: Arc<ApprovalLifecycle>, concurrency: u32) -> Self {
        Self { lifecycle, concurrency: concurrency.max(1) as usize }
    }

    pub async fn apply_batch(
        &self,
        ids: Vec<ApprovalId>,
        actor: &Actor,
        outcome: DecisionOutcome,
        rejection_reason: Option<String>,
    ) -> BatchOutcome {
        let submitted = ids.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(submitted);

        for id in ids {
            let lifecycle = Arc::clone(&self.lifecycle);
            let semaphore = Arc::clone(&semaphore);
            let actor = actor.clone();
            let rejection_reason = rejection_reason.clone();
            let item = id.clone();
            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        lifecycle.decide(&id, &actor, outcome, None, rejection_reason).await
                    }
                    Err(closed) => Err(WorkflowError::storage(closed)),
                };
                (id, result)
            });
            spawned.insert(handle.id(), item);
        }

        let report = drain_batch(tasks, spawned).await;

        info!(
            event_name = "batch.completed",
            submitted,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            outcome = outcome.as_str(),
            decided_by = %actor.id,
            "batch decision run finished"
        );

        report
    }
}

/// Joins every spawned item into the report. A panicked task is charged to
/// its id through the spawn-time task map, so the report still accounts for
/// every submitted id exactly once.
async fn drain_batch(
    mut tasks: JoinSet<(ApprovalId, Result<ApprovalRequest, WorkflowError>)>,
    mut spawned: HashMap<task::Id, ApprovalId>,
) -> BatchOutcome {
    let mut report = BatchOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        let (id, result) = match joined {
            Ok(item) => item,
            Err(join_error) => {
                let Some(id) = spawned.remove(&join_error.id()) else {
                    debug!(
                        event_name = "batch.unknown_task",
                        error = %join_error,
                        "joined a task that was never mapped to an id"
                    );
                    continue;
                };
                debug!(
                    event_name = "batch.item_panicked",
                    approval_id = %id,
                    error = %join_error,
                    "batch item task failed to join"
                );
                report.failed.push(BatchFailure {
                    id,
                    kind: ErrorKind::Storage,
                    message: join_error.to_string(),
                });
                continue;
            }
        };
        match result {
            Ok(decided) => report.succeeded.push(decided.id),
            Err(error) => {
                debug!(
                    event_name = "batch.item_failed",
                    approval_id = %id,
                    kind = error.kind().as_str(),
                    error = %error,
                    "batch item not applied"
                );
                report.failed.push(BatchFailure {
                    id,
                    kind: error.kind(),
                    message: error.to_string(),
                });
            }
        }
    }
    report
}
