use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Tables the workflow cannot run without.
pub const BASELINE_TABLES: &[&str] = &[
    "project",
    "project_member",
    "approval_request",
    "stage_transition",
    "audit_log",
    "notification",
];

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug)]
pub struct SchemaStatus {
    pub applied: i64,
    pub missing_tables: Vec<&'static str>,
}

impl SchemaStatus {
    pub fn is_complete(&self) -> bool {
        self.missing_tables.is_empty()
    }
}

/// Inspects the live schema: how many migrations the ledger records and
/// which baseline tables, if any, are missing.
pub async fn schema_status(pool: &DbPool) -> Result<SchemaStatus, sqlx::Error> {
    let mut missing_tables = Vec::new();
    for table in BASELINE_TABLES {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        if present == 0 {
            missing_tables.push(*table);
        }
    }

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok(SchemaStatus { applied, missing_tables })
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "project",
        "project_member",
        "approval_request",
        "stage_transition",
        "audit_log",
        "notification",
        "idx_project_member_user_id",
        "idx_approval_request_status",
        "idx_approval_request_project_id",
        "idx_approval_request_requested_to",
        "idx_approval_request_created_at",
        "idx_stage_transition_project_id",
        "idx_stage_transition_approval_id",
        "idx_stage_transition_pending_project",
        "idx_audit_log_entity_seq",
        "idx_audit_log_occurred_at",
        "idx_notification_recipient",
        "idx_notification_created_at",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in super::BASELINE_TABLES {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "table {table} should exist after migrations");
        }
    }

    #[tokio::test]
    async fn migrations_enforce_single_pending_transition_per_project() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO project (id, name, phase, status, progress_pct, created_at, updated_at)
             VALUES ('proj-1', 'Test', 'development', 'active', 40, '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert project");

        for approval in ["apr-1", "apr-2"] {
            sqlx::query(
                "INSERT INTO approval_request (id, project_id, kind, title, requested_by, requested_to,
                                               priority, status, created_at, updated_at)
                 VALUES (?1, 'proj-1', 'stage_transition', 'Gate', 'pm-1', 'admin-1',
                         'medium', 'pending', '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')",
            )
            .bind(approval)
            .execute(&pool)
            .await
            .expect("insert approval");
        }

        sqlx::query(
            "INSERT INTO stage_transition (id, project_id, from_phase, to_phase, requested_by,
                                           approval_id, status, created_at, updated_at)
             VALUES ('trn-1', 'proj-1', 'development', 'testing', 'pm-1',
                     'apr-1', 'pending', '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert first pending transition");

        let second = sqlx::query(
            "INSERT INTO stage_transition (id, project_id, from_phase, to_phase, requested_by,
                                           approval_id, status, created_at, updated_at)
             VALUES ('trn-2', 'proj-1', 'development', 'testing', 'pm-1',
                     'apr-2', 'pending', '2026-03-01T00:00:00Z', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;

        let error = second.expect_err("second pending transition for the same project must fail");
        match error {
            sqlx::Error::Database(db_error) => assert!(db_error.is_unique_violation()),
            other => panic!("expected unique violation, got {other:?}"),
        }

        // A terminal row does not occupy the pending slot.
        sqlx::query("UPDATE stage_transition SET status = 'approved' WHERE id = 'trn-1'")
            .execute(&pool)
            .await
            .expect("resolve first transition");

        sqlx::query(
            "INSERT INTO stage_transition (id, project_id, from_phase, to_phase, requested_by,
                                           approval_id, status, created_at, updated_at)
             VALUES ('trn-3', 'proj-1', 'testing', 'completed', 'pm-1',
                     'apr-2', 'pending', '2026-03-02T00:00:00Z', '2026-03-02T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("pending slot frees up once the previous transition is terminal");
    }

    #[tokio::test]
    async fn schema_status_reports_the_ledger_and_missing_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let status = super::schema_status(&pool).await.expect("schema status");
        assert!(status.is_complete());
        assert!(status.applied > 0);

        sqlx::query("DROP TABLE notification")
            .execute(&pool)
            .await
            .expect("drop notification table");

        let status = super::schema_status(&pool).await.expect("schema status");
        assert!(!status.is_complete());
        assert_eq!(status.missing_tables, vec!["notification"]);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let project_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'project'",
        )
        .fetch_one(&pool)
        .await
        .expect("check project table removed")
        .get::<i64, _>("count");

        assert_eq!(project_count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
