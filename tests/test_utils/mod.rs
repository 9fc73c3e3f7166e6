//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite databases with migrations applied, session-aware configuration and
//! servers bound to ephemeral ports.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clinic_sync::config::{AppConfig, SessionToken};
use clinic_sync::models::TenantId;
use clinic_sync::store::{DatabaseStore, TenantStore};
use sea_orm::DatabaseConnection;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub const TOKEN_A: &str = "session-clinic-a";
pub const TOKEN_B: &str = "session-clinic-b";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    clinic_sync::db::connect_in_memory().await
}

/// Database-backed store over a fresh in-memory database.
pub async fn setup_test_store() -> Result<Arc<dyn TenantStore>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(DatabaseStore::new(Arc::new(db))))
}

pub fn tenant(raw: &str) -> TenantId {
    TenantId::parse(raw).expect("valid tenant id")
}

/// Test profile with one session for `clinic-a` and one for `clinic-b`.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        session_tokens: vec![
            SessionToken {
                token: TOKEN_A.to_string(),
                tenant: tenant("clinic-a"),
            },
            SessionToken {
                token: TOKEN_B.to_string(),
                tenant: tenant("clinic-b"),
            },
        ],
        relay_poll_interval_ms: 50,
        webhook_max_body_kb: 4,
        ..Default::default()
    }
}

pub struct TestServer {
    pub url: String,
    shutdown: CancellationToken,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    /// Serves `app` on an ephemeral port until `shutdown` is cancelled.
    pub async fn spawn(app: Router, shutdown: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server_shutdown = shutdown.clone();
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .context("axum server error")
        });

        Ok(Self {
            url: format!("http://{addr}"),
            shutdown,
            join_handle: Some(join_handle),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
