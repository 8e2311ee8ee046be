//! Orchestration services over the domain and the repositories: the approval
//! lifecycle, the stage-transition coordinator that rides on it, batched
//! decisions and notification fan-out.

pub mod audit;
pub mod batch;
pub mod coordinator;
pub mod fanout;
pub mod lifecycle;

pub use audit::AuditRecorder;
pub use batch::{BatchDecisionProcessor, BatchFailure, BatchOutcome};
pub use coordinator::StageTransitionCoordinator;
pub use fanout::NotificationFanout;
pub use lifecycle::ApprovalLifecycle;

use stagegate_core::errors::WorkflowError;
use stagegate_db::repositories::RepositoryError;

pub(crate) fn storage_error(error: RepositoryError) -> WorkflowError {
    WorkflowError::storage(error)
}
