//! # Clinic Sync Main Entry Point
//!
//! Dashboard API with inline webhook ingestion.

use anyhow::Context;
use clinic_sync::{config::ConfigLoader, db, server::run_server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    telemetry::init_tracing(&config).context("failed to initialize tracing")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    run_server(config, db).await
}
