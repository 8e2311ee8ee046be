use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed, ordered delivery phases. There is deliberately no way to express a
/// parallel or branching plan; a project is always in exactly one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Design,
    Development,
    Testing,
    Completed,
}

/// Whether a requested phase change steps forward or backward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStep {
    Advance,
    Rollback,
}

impl ProjectPhase {
    pub const ORDERED: [ProjectPhase; 4] =
        [Self::Design, Self::Development, Self::Testing, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "design" => Some(Self::Design),
            "development" => Some(Self::Development),
            "testing" => Some(Self::Testing),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    fn position(&self) -> usize {
        Self::ORDERED.iter().position(|phase| phase == self).unwrap_or(0)
    }

    pub fn successor(&self) -> Option<ProjectPhase> {
        Self::ORDERED.get(self.position() + 1).copied()
    }

    pub fn predecessor(&self) -> Option<ProjectPhase> {
        self.position().checked_sub(1).and_then(|index| Self::ORDERED.get(index)).copied()
    }

    /// Classifies `target` relative to `self`. Returns `None` for any jump
    /// that is not an immediate neighbor; phases are never skipped.
    pub fn step_to(&self, target: ProjectPhase) -> Option<PhaseStep> {
        if self.successor() == Some(target) {
            Some(PhaseStep::Advance)
        } else if self.predecessor() == Some(target) {
            Some(PhaseStep::Rollback)
        } else {
            None
        }
    }

    /// Nominal completion percentage for a project sitting in this phase.
    pub fn progress_pct(&self) -> u8 {
        match self {
            Self::Design => 10,
            Self::Development => 40,
            Self::Testing => 75,
            Self::Completed => 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn for_phase(phase: ProjectPhase) -> Self {
        if phase == ProjectPhase::Completed {
            Self::Completed
        } else {
            Self::Active
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub user_id: UserId,
    pub notify_on_phase_change: bool,
}

/// Project aggregate as consumed by the workflow. `current_phase`, `status`
/// and `progress_pct` are only ever mutated through the stage-transition
/// coordinator's atomic commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub current_phase: ProjectPhase,
    pub status: ProjectStatus,
    pub progress_pct: u8,
    pub members: Vec<ProjectMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        id: ProjectId,
        name: String,
        phase: ProjectPhase,
        members: Vec<ProjectMember>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            current_phase: phase,
            status: ProjectStatus::for_phase(phase),
            progress_pct: phase.progress_pct(),
            members,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the project to `phase`, keeping `status` and `progress_pct`
    /// in lockstep. The persisted values always come from the same phase.
    pub fn set_phase(&mut self, phase: ProjectPhase, now: DateTime<Utc>) {
        self.current_phase = phase;
        self.status = ProjectStatus::for_phase(phase);
        self.progress_pct = phase.progress_pct();
        self.updated_at = now;
    }

    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.iter().any(|member| &member.user_id == user_id)
    }

    pub fn phase_change_subscribers(&self) -> impl Iterator<Item = &UserId> {
        self.members
            .iter()
            .filter(|member| member.notify_on_phase_change)
            .map(|member| &member.user_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{PhaseStep, Project, ProjectId, ProjectPhase, ProjectStatus};

    #[test]
    fn phase_round_trips_from_storage_encoding() {
        for phase in ProjectPhase::ORDERED {
            assert_eq!(ProjectPhase::parse(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn successor_walks_the_fixed_order() {
        assert_eq!(ProjectPhase::Design.successor(), Some(ProjectPhase::Development));
        assert_eq!(ProjectPhase::Development.successor(), Some(ProjectPhase::Testing));
        assert_eq!(ProjectPhase::Testing.successor(), Some(ProjectPhase::Completed));
        assert_eq!(ProjectPhase::Completed.successor(), None);
    }

    #[test]
    fn predecessor_walks_the_fixed_order_backwards() {
        assert_eq!(ProjectPhase::Completed.predecessor(), Some(ProjectPhase::Testing));
        assert_eq!(ProjectPhase::Design.predecessor(), None);
    }

    #[test]
    fn step_to_accepts_only_immediate_neighbors() {
        assert_eq!(
            ProjectPhase::Design.step_to(ProjectPhase::Development),
            Some(PhaseStep::Advance)
        );
        assert_eq!(
            ProjectPhase::Testing.step_to(ProjectPhase::Development),
            Some(PhaseStep::Rollback)
        );
        assert_eq!(ProjectPhase::Design.step_to(ProjectPhase::Testing), None);
        assert_eq!(ProjectPhase::Design.step_to(ProjectPhase::Completed), None);
        assert_eq!(ProjectPhase::Design.step_to(ProjectPhase::Design), None);
    }

    #[test]
    fn status_tracks_terminal_phase() {
        assert_eq!(ProjectStatus::for_phase(ProjectPhase::Completed), ProjectStatus::Completed);
        assert_eq!(ProjectStatus::for_phase(ProjectPhase::Testing), ProjectStatus::Active);
    }

    #[test]
    fn set_phase_keeps_progress_and_status_in_lockstep() {
        let mut project = Project::new(
            ProjectId("proj-1".to_string()),
            "Agency site relaunch".to_string(),
            ProjectPhase::Design,
            Vec::new(),
            Utc::now(),
        );
        assert_eq!(project.progress_pct, 10);
        assert_eq!(project.status, ProjectStatus::Active);

        project.set_phase(ProjectPhase::Completed, Utc::now());
        assert_eq!(project.progress_pct, 100);
        assert_eq!(project.status, ProjectStatus::Completed);

        project.set_phase(ProjectPhase::Testing, Utc::now());
        assert_eq!(project.progress_pct, 75);
        assert_eq!(project.status, ProjectStatus::Active);
    }
}
