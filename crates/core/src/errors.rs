use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four caller-facing failure kinds of the workflow, plus a stringly
/// storage variant so the enum stays `Clone + PartialEq` for assertions.
/// None of these are retried internally; `Conflict` and `NotFound` are
/// expected, recoverable-by-refetch outcomes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden { reason: reason.into() }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict { reason: reason.into() }
    }

    /// Canonical conflict for a second decision attempt, phrased so callers
    /// can show "already decided" instead of a generic failure.
    pub fn already_decided(id: impl std::fmt::Display, status: &str) -> Self {
        Self::Conflict { reason: format!("approval `{id}` was already decided ({status})") }
    }

    pub fn storage(source: impl std::fmt::Display) -> Self {
        Self::Storage(source.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Flattened failure kind used in batch reports and reconciler signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
