//! Standalone webhook ingestion server.
//!
//! Serves only `/webhook/{tenant_id}` (and a liveness probe) on its own port, writing
//! into the same database as the dashboard API.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use clinic_sync::{config::ConfigLoader, db, server::run_webhook_server, telemetry};

#[derive(Debug, Parser)]
#[command(name = "webhook-server", about = "Receives clinic webhooks", version)]
struct Args {
    /// Overrides CLINIC_WEBHOOK_BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    telemetry::init_tracing(&config).context("failed to initialize tracing")?;

    let addr = match args.bind {
        Some(addr) => addr,
        None => config
            .webhook_bind_addr()
            .context("invalid webhook bind address")?,
    };

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    run_webhook_server(config, db, addr).await
}
