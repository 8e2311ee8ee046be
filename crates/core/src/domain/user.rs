use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role handed to us by the identity provider. The workflow trusts it as-is;
/// credential verification happens upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    ProjectManager,
    Lead,
    Contributor,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::ProjectManager => "project_manager",
            Self::Lead => "lead",
            Self::Contributor => "contributor",
            Self::Client => "client",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "project_manager" => Some(Self::ProjectManager),
            "lead" => Some(Self::Lead),
            "contributor" => Some(Self::Contributor),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    /// Agency-side roles, as opposed to external client accounts.
    pub fn is_internal(&self) -> bool {
        !matches!(self, Self::Client)
    }

    /// Administrative roles may decide on behalf of any reviewer.
    pub fn is_administrative(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// The acting identity threaded through every workflow call. There is no
/// ambient session lookup; callers always pass the actor explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: UserId(id.into()), role }
    }
}
