use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalKind, ApprovalRequest};
use crate::domain::project::Project;
use crate::domain::user::{Actor, Role, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateDenial {
    RoleCannotCreate { role: Role, approval_kind: ApprovalKind },
    NotAssignedReviewer { actor: UserId },
    NotVisible { actor: UserId },
}

impl GateDenial {
    fn reason(&self) -> String {
        match self {
            Self::RoleCannotCreate { role, approval_kind } => {
                format!(
                    "role `{}` may not request `{}` approvals",
                    role.as_str(),
                    approval_kind.as_str()
                )
            }
            Self::NotAssignedReviewer { actor } => {
                format!("user `{actor}` is not the assigned reviewer")
            }
            Self::NotVisible { actor } => {
                format!("user `{actor}` has no access to this approval")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheck {
    pub allowed: bool,
    pub reason: String,
    pub denial: Option<GateDenial>,
}

impl GateCheck {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), denial: None }
    }

    fn deny(denial: GateDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), denial: Some(denial) }
    }
}

/// Role and ownership predicates for the approval workflow. The gate trusts
/// the identity provider's `Actor` as handed in; it never re-verifies
/// credentials or loads users itself.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationGate;

impl AuthorizationGate {
    pub fn new() -> Self {
        Self
    }

    /// Creation is gated on role alone. Stage transitions are reserved for
    /// project managers and admins; design sign-offs additionally admit
    /// leads; anything else is open to every internal role. Clients never
    /// open requests, they only review them.
    pub fn can_create(&self, actor: &Actor, kind: ApprovalKind) -> GateCheck {
        let allowed = match kind {
            ApprovalKind::StageTransition => {
                matches!(actor.role, Role::Admin | Role::ProjectManager)
            }
            ApprovalKind::Design => {
                matches!(actor.role, Role::Admin | Role::ProjectManager | Role::Lead)
            }
            ApprovalKind::Deliverable | ApprovalKind::Generic => actor.role.is_internal(),
        };

        if allowed {
            GateCheck::allow(format!(
                "role `{}` may request `{}` approvals",
                actor.role.as_str(),
                kind.as_str()
            ))
        } else {
            GateCheck::deny(GateDenial::RoleCannotCreate {
                role: actor.role,
                approval_kind: kind,
            })
        }
    }

    /// Only the assigned reviewer decides; an administrative role is the
    /// single override. Everyone else is denied even if they can view.
    pub fn can_decide(&self, actor: &Actor, request: &ApprovalRequest) -> GateCheck {
        if actor.id == request.requested_to {
            return GateCheck::allow(format!(
                "user `{}` is the assigned reviewer of `{}`",
                actor.id, request.id
            ));
        }

        if actor.role.is_administrative() {
            return GateCheck::allow(format!(
                "role `{}` overrides reviewer assignment on `{}`",
                actor.role.as_str(),
                request.id
            ));
        }

        GateCheck::deny(GateDenial::NotAssignedReviewer { actor: actor.id.clone() })
    }

    /// Visibility is wider than decision rights: requester, reviewer,
    /// whoever decided, project members and admins. Unauthorized viewers
    /// get a denial, not a pretend-absence.
    pub fn can_view(
        &self,
        actor: &Actor,
        request: &ApprovalRequest,
        project: Option<&Project>,
    ) -> GateCheck {
        if actor.role.is_administrative() {
            return GateCheck::allow(format!(
                "role `{}` may view any approval",
                actor.role.as_str()
            ));
        }

        let involved = actor.id == request.requested_by
            || actor.id == request.requested_to
            || request.decided_by.as_ref() == Some(&actor.id);
        if involved {
            return GateCheck::allow(format!(
                "user `{}` is a party to `{}`",
                actor.id, request.id
            ));
        }

        if let Some(project) = project {
            if project.is_member(&actor.id) {
                return GateCheck::allow(format!(
                    "user `{}` is a member of project `{}`",
                    actor.id, project.id
                ));
            }
        }

        GateCheck::deny(GateDenial::NotVisible { actor: actor.id.clone() })
    }
}
