use serde::{Deserialize, Serialize};

pub mod approval;
pub mod notification;
pub mod project;
pub mod transition;
pub mod user;

/// Entities the workflow audits and cross-references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Approval,
    StageTransition,
    Project,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::StageTransition => "stage_transition",
            Self::Project => "project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approval" => Some(Self::Approval),
            "stage_transition" => Some(Self::StageTransition),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}
