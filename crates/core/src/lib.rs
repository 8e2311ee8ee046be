pub mod audit;
pub mod authorization;
pub mod config;
pub mod domain;
pub mod errors;
pub mod reconcile;

pub use audit::{AuditAction, AuditChain, AuditLogEntry, ChainVerification};
pub use authorization::{AuthorizationGate, GateCheck, GateDenial};
pub use domain::approval::{
    ApprovalId, ApprovalKind, ApprovalRequest, ApprovalStatus, Attachment, DecisionOutcome,
    DecisionRecord, NewApprovalRequest, Priority,
};
pub use domain::notification::{
    decision_recipients, Notification, NotificationId, NotificationKind,
};
pub use domain::project::{
    PhaseStep, Project, ProjectId, ProjectMember, ProjectPhase, ProjectStatus,
};
pub use domain::transition::{StageTransition, TransitionId, TransitionStatus};
pub use domain::user::{Actor, Role, UserId};
pub use domain::EntityKind;
pub use errors::{ErrorKind, WorkflowError};
pub use reconcile::{ReconcileAction, WorkingSet, DEFAULT_REFETCH_THRESHOLD};
