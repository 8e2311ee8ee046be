use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Seed contract: each demo project with the phase and open work it carries.
const SEED_PROJECTS: &[SeedProjectContract] = &[
    SeedProjectContract {
        project_id: "PRJ-demo-atlas",
        name: "Atlas Website Rebuild",
        phase: "development",
        progress_pct: 40,
        member_count: 3,
        pending_approvals: 2,
        has_pending_transition: true,
        description: "Mid-build project with a transition to testing awaiting sign-off",
    },
    SeedProjectContract {
        project_id: "PRJ-demo-borealis",
        name: "Borealis Mobile App",
        phase: "design",
        progress_pct: 10,
        member_count: 2,
        pending_approvals: 0,
        has_pending_transition: false,
        description: "Early-phase project with one approved deliverable",
    },
    SeedProjectContract {
        project_id: "PRJ-demo-cinder",
        name: "Cinder Brand Refresh",
        phase: "testing",
        progress_pct: 75,
        member_count: 2,
        pending_approvals: 0,
        has_pending_transition: false,
        description: "Late-phase project with no open approvals",
    },
];

const SEED_APPROVAL_IDS: &[&str] =
    &["APR-demo-0001", "APR-demo-0002", "APR-demo-0003", "APR-demo-0004"];

const SEED_TRANSITION_IDS: &[&str] = &["TRN-demo-0001"];

const SEED_NOTIFICATION_IDS: &[&str] = &["NTF-demo-0001", "NTF-demo-0002"];

/// Deterministic demo dataset for local development and end-to-end checks.
///
/// Covers the states the workflow produces: pending, approved, and rejected
/// approvals, a stage transition waiting on its gating approval, and the
/// notifications those events fanned out. The audit log is deliberately left
/// empty; its entries are HMAC-chained and only the recorder can mint them.
pub struct DemoDataset;

impl DemoDataset {
    /// SQL fixture content for the demo dataset.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Load the demo dataset into the database. Idempotent.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let projects_seeded = SEED_PROJECTS
            .iter()
            .map(|project| ProjectSeedInfo {
                project_id: project.project_id,
                name: project.name,
                description: project.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { projects_seeded })
    }

    /// Verify that the seeded rows exist and match the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let quoted_approvals = sql_array_from_ids(SEED_APPROVAL_IDS);
        let expected_approval_total = SEED_APPROVAL_IDS.len() as i64;
        let approval_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM approval_request WHERE id IN {quoted_approvals}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("approval-requests", approval_count == expected_approval_total));

        let decided_have_decider: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM approval_request WHERE id IN {quoted_approvals} AND status != 'pending' AND (decided_by IS NULL OR decided_at IS NULL)"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("decided-approvals-carry-decider", decided_have_decider == 0));

        let rejected_have_reason: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM approval_request WHERE id IN {quoted_approvals} AND status = 'rejected' AND rejection_reason IS NULL"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("rejected-approvals-carry-reason", rejected_have_reason == 0));

        for project in SEED_PROJECTS {
            let project_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM project WHERE id = ?1 AND name = ?2 AND phase = ?3 AND progress_pct = ?4 AND status = 'active')",
            )
            .bind(project.project_id)
            .bind(project.name)
            .bind(project.phase)
            .bind(project.progress_pct)
            .fetch_one(pool)
            .await?;
            checks.push((project.row_label(), project_ok == 1));

            let member_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM project_member WHERE project_id = ?1")
                    .bind(project.project_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((project.member_label(), member_count == project.member_count));

            let pending_approvals: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_request WHERE project_id = ?1 AND status = 'pending'",
            )
            .bind(project.project_id)
            .fetch_one(pool)
            .await?;
            checks.push((project.pending_label(), pending_approvals == project.pending_approvals));

            let pending_transitions: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM stage_transition WHERE project_id = ?1 AND status = 'pending'",
            )
            .bind(project.project_id)
            .fetch_one(pool)
            .await?;
            let expected_transitions = if project.has_pending_transition { 1 } else { 0 };
            checks.push((project.transition_label(), pending_transitions == expected_transitions));
        }

        // Every transition must point at a stage_transition-kind approval.
        let quoted_transitions = sql_array_from_ids(SEED_TRANSITION_IDS);
        let dangling_transitions: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM stage_transition t WHERE t.id IN {quoted_transitions} AND NOT EXISTS(SELECT 1 FROM approval_request a WHERE a.id = t.approval_id AND a.kind = 'stage_transition')"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("transitions-anchor-gating-approval", dangling_transitions == 0));

        let quoted_notifications = sql_array_from_ids(SEED_NOTIFICATION_IDS);
        let notification_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM notification WHERE id IN {quoted_notifications}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("notifications", notification_count == SEED_NOTIFICATION_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Clean up seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_notifications = sql_array_from_ids(SEED_NOTIFICATION_IDS);
        let quoted_transitions = sql_array_from_ids(SEED_TRANSITION_IDS);
        let quoted_approvals = sql_array_from_ids(SEED_APPROVAL_IDS);
        let quoted_projects = sql_array_from_ids(
            &SEED_PROJECTS.iter().map(|project| project.project_id).collect::<Vec<_>>(),
        );

        sqlx::query(&format!("DELETE FROM notification WHERE id IN {quoted_notifications}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM stage_transition WHERE id IN {quoted_transitions}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM approval_request WHERE id IN {quoted_approvals}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM project_member WHERE project_id IN {quoted_projects}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM project WHERE id IN {quoted_projects}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedProjectContract {
    project_id: &'static str,
    name: &'static str,
    phase: &'static str,
    progress_pct: i64,
    member_count: i64,
    pending_approvals: i64,
    has_pending_transition: bool,
    description: &'static str,
}

impl SeedProjectContract {
    fn row_label(&self) -> &'static str {
        match self.project_id {
            "PRJ-demo-atlas" => "project-atlas-row",
            "PRJ-demo-borealis" => "project-borealis-row",
            _ => "project-cinder-row",
        }
    }

    fn member_label(&self) -> &'static str {
        match self.project_id {
            "PRJ-demo-atlas" => "project-atlas-members",
            "PRJ-demo-borealis" => "project-borealis-members",
            _ => "project-cinder-members",
        }
    }

    fn pending_label(&self) -> &'static str {
        match self.project_id {
            "PRJ-demo-atlas" => "project-atlas-pending-approvals",
            "PRJ-demo-borealis" => "project-borealis-pending-approvals",
            _ => "project-cinder-pending-approvals",
        }
    }

    fn transition_label(&self) -> &'static str {
        match self.project_id {
            "PRJ-demo-atlas" => "project-atlas-pending-transition",
            "PRJ-demo-borealis" => "project-borealis-pending-transition",
            _ => "project-cinder-pending-transition",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub projects_seeded: Vec<ProjectSeedInfo>,
}

#[derive(Debug)]
pub struct ProjectSeedInfo {
    pub project_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoDataset::SQL.is_empty());
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoDataset::verify(&pool).await.expect("verify seed fixtures");
        assert!(first_verification.all_present, "checks: {:?}", first_verification.checks);
        assert_eq!(first.projects_seeded.len(), 3);

        let second = DemoDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification =
            DemoDataset::verify(&pool).await.expect("re-verify seed fixtures");
        assert!(second_verification.all_present);
        assert_eq!(second.projects_seeded.len(), 3);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn seeded_rows_load_through_the_repositories() {
        use crate::repositories::{
            ApprovalFilter, ApprovalRepository, ProjectRepository, SqlApprovalRepository,
            SqlProjectRepository, SqlTransitionRepository, TransitionRepository,
        };
        use stagegate_core::domain::approval::ApprovalStatus;
        use stagegate_core::domain::project::{ProjectId, ProjectPhase};

        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");
        DemoDataset::load(&pool).await.expect("load seed fixtures");

        let projects = SqlProjectRepository::new(pool.clone());
        let approvals = SqlApprovalRepository::new(pool.clone());
        let transitions = SqlTransitionRepository::new(pool.clone());

        let atlas_id = ProjectId("PRJ-demo-atlas".to_string());
        let atlas = projects
            .find_by_id(&atlas_id)
            .await
            .expect("load atlas project")
            .expect("atlas project exists");
        assert_eq!(atlas.current_phase, ProjectPhase::Development);
        assert_eq!(atlas.progress_pct, 40);

        let pending = approvals
            .list(&ApprovalFilter { status: Some(ApprovalStatus::Pending), ..Default::default() })
            .await
            .expect("list pending approvals");
        assert_eq!(pending.len(), 2);

        let transition = transitions
            .find_pending_for_project(&atlas_id)
            .await
            .expect("load pending transition")
            .expect("atlas has a pending transition");
        assert_eq!(transition.approval_id.as_str(), "APR-demo-0004");

        DemoDataset::clean(&pool).await.expect("clean seed fixtures");
        let after_clean = projects.find_by_id(&atlas_id).await.expect("query after clean");
        assert!(after_clean.is_none());
    }

    #[tokio::test]
    async fn clean_removes_only_seeded_rows() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect to test database");

        migrations::run_pending(&pool).await.expect("run migrations");
        DemoDataset::load(&pool).await.expect("load seed fixtures");

        sqlx::query(
            "INSERT INTO project (id, name, phase, status, progress_pct, created_at, updated_at) \
             VALUES ('PRJ-local-keep', 'Keep Me', 'design', 'active', 10, '2026-08-01T00:00:00Z', '2026-08-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert unrelated project");

        DemoDataset::clean(&pool).await.expect("clean seed fixtures");

        let seeded_left: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM project WHERE id LIKE 'PRJ-demo-%'")
                .fetch_one(&pool)
                .await
                .expect("count seeded projects");
        assert_eq!(seeded_left, 0);

        let kept: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM project WHERE id = 'PRJ-local-keep'")
            .fetch_one(&pool)
            .await
            .expect("count unrelated project");
        assert_eq!(kept, 1);
    }
}
