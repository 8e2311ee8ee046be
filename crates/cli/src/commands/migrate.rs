use crate::commands::CommandResult;
use stagegate_core::config::{AppConfig, LoadOptions};
use stagegate_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        // A clean run that still leaves workflow tables missing is a
        // failure, not a success.
        let status = migrations::schema_status(&pool)
            .await
            .map_err(|error| ("schema_verification", error.to_string(), 5u8))?;
        if !status.is_complete() {
            return Err((
                "schema_verification",
                format!("tables missing after migration: {}", status.missing_tables.join(", ")),
                5u8,
            ));
        }
        pool.close().await;
        Ok::<i64, (&'static str, String, u8)>(status.applied)
    });

    match result {
        Ok(applied) => CommandResult::success(
            "migrate",
            format!("schema is current: {applied} migrations recorded, workflow tables verified"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
