use std::sync::Arc;

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use stagegate_core::audit::AuditChain;
use stagegate_core::authorization::AuthorizationGate;
use stagegate_core::config::{AppConfig, ConfigError, LoadOptions};
use stagegate_db::repositories::{
    SqlApprovalRepository, SqlAuditLogRepository, SqlNotificationRepository, SqlProjectRepository,
    SqlTransitionRepository,
};
use stagegate_db::{connect_from_config, migrations, DbPool};
use stagegate_notify::{transport_from_config, TransportError};
use stagegate_workflow::{
    ApprovalLifecycle, AuditRecorder, BatchDecisionProcessor, NotificationFanout,
    StageTransitionCoordinator,
};

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects the pool, applies migrations and wires the workflow services
/// onto their SQL repositories.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let approvals = Arc::new(SqlApprovalRepository::new(db_pool.clone()));
    let projects = Arc::new(SqlProjectRepository::new(db_pool.clone()));
    let transitions = Arc::new(SqlTransitionRepository::new(db_pool.clone()));
    let audit_log = Arc::new(SqlAuditLogRepository::new(db_pool.clone()));
    let notifications = Arc::new(SqlNotificationRepository::new(db_pool.clone()));

    let transport = transport_from_config(&config.notifications)?;
    info!(
        event_name = "system.bootstrap.notification_transport",
        transport = transport.name(),
        "notification transport initialized"
    );

    let gate = AuthorizationGate::new();
    let audit = AuditRecorder::new(
        audit_log,
        AuditChain::new(config.audit.signing_key.expose_secret()),
    );
    let fanout = NotificationFanout::new(notifications, transport);

    let coordinator = Arc::new(StageTransitionCoordinator::new(
        projects.clone(),
        transitions,
        approvals.clone(),
        gate.clone(),
        audit.clone(),
        fanout.clone(),
    ));
    let lifecycle = Arc::new(ApprovalLifecycle::new(
        approvals.clone(),
        projects.clone(),
        gate.clone(),
        audit,
        fanout,
        coordinator.clone(),
    ));
    let batch =
        BatchDecisionProcessor::new(lifecycle.clone(), config.workflow.batch_concurrency);

    let state = ApiState::new(
        lifecycle,
        coordinator,
        batch,
        approvals,
        projects,
        gate,
        config.workflow.refetch_threshold,
    );

    Ok(Application { config, db_pool, state })
}

#[cfg(test)]
mod tests {
    use stagegate_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_services() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('project', 'project_member', 'approval_request', 'stage_transition', \
              'audit_log', 'notification')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema should be queryable after bootstrap");
        assert_eq!(table_count, 6);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_notification_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                notifications_enabled: Some(true),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("webhook_url"));
    }
}
