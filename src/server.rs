//! # Server Configuration
//!
//! Router assembly and serving for the dashboard API and the standalone webhook server.
//! Both mount the same ingestion router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, patch},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::ingestion::{self, IngestionState};
use crate::relay::{ChangeHub, LiveRelay};
use crate::store::{DatabaseStore, TenantStore};
use crate::telemetry;
use crate::writer::ChangeLogWriter;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn TenantStore>,
    pub writer: ChangeLogWriter,
    pub relay: LiveRelay,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires writer and relay around one store and one change hub.
    pub fn new(config: AppConfig, store: Arc<dyn TenantStore>) -> Self {
        let shutdown = CancellationToken::new();
        let hub = ChangeHub::new(config.relay_channel_capacity);
        let writer = ChangeLogWriter::new(Arc::clone(&store), hub.clone());
        let relay = LiveRelay::new(Arc::clone(&store), hub, config.relay_poll_interval())
            .with_shutdown(shutdown.clone());

        Self {
            config: Arc::new(config),
            store,
            writer,
            relay,
            shutdown,
        }
    }

    pub fn ingestion_state(&self) -> IngestionState {
        IngestionState::new(self.writer.clone(), self.config.webhook_max_body_bytes())
    }
}

fn dashboard_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Trace id propagation and HTTP spans, applied to every served router.
fn with_observability(router: Router) -> Router {
    router
        .layer(middleware::from_fn(telemetry::trace_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/collections/{collection}/records",
            get(handlers::records::list_records).post(handlers::records::create_record),
        )
        .route(
            "/collections/{collection}/records/{id}",
            patch(handlers::records::update_record).delete(handlers::records::delete_record),
        )
        .route(
            "/collections/{collection}/stream",
            get(handlers::streams::stream_records),
        )
        .route("/dashboard/summary", get(handlers::dashboard::summary))
        .route(
            "/dashboard/summary/stream",
            get(handlers::dashboard::stream_summary),
        )
        .route("/integration", get(handlers::dashboard::integration))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    let dashboard = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .merge(protected)
        .with_state(state.clone())
        .layer(dashboard_cors())
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()));

    with_observability(dashboard.merge(ingestion::router(state.ingestion_state())))
}

/// Router of the standalone webhook server: ingestion plus a liveness probe.
pub fn create_webhook_app(state: IngestionState) -> Router {
    with_observability(
        Router::new()
            .route("/healthz", get(handlers::healthz))
            .merge(ingestion::router(state)),
    )
}

/// Builds the shared state on top of a migrated database.
pub fn database_state(config: AppConfig, db: DatabaseConnection) -> AppState {
    let store: Arc<dyn TenantStore> = Arc::new(DatabaseStore::new(Arc::new(db)));
    AppState::new(config, store)
}

/// Starts the dashboard API (with inline ingestion) with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr().context("invalid API bind address")?;
    let state = database_state(config, db);
    let shutdown = state.shutdown.clone();
    info!(profile = %state.config.profile, store = state.store.backend_name(), "Starting dashboard API");

    serve(addr, create_app(state), shutdown).await
}

/// Starts the standalone webhook server
pub async fn run_webhook_server(
    config: AppConfig,
    db: DatabaseConnection,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let state = database_state(config, db);
    let shutdown = state.shutdown.clone();
    info!(profile = %state.config.profile, "Starting webhook server");

    serve(addr, create_webhook_app(state.ingestion_state()), shutdown).await
}

async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    tokio::spawn(shutdown_signal(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
pub async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::records::list_records,
        crate::handlers::records::create_record,
        crate::handlers::records::update_record,
        crate::handlers::records::delete_record,
        crate::handlers::streams::stream_records,
        crate::handlers::dashboard::summary,
        crate::handlers::dashboard::stream_summary,
        crate::handlers::dashboard::integration,
        crate::ingestion::routes::receive_webhook,
        crate::ingestion::routes::preflight,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Collection,
            crate::models::Patient,
            crate::models::PatientStatus,
            crate::models::Deal,
            crate::models::DealStatus,
            crate::error::ApiError,
            crate::handlers::SnapshotParams,
            crate::handlers::dashboard::DashboardSummary,
            crate::handlers::dashboard::IntegrationInfo,
            crate::ingestion::WebhookAck,
            crate::ingestion::IngestFailure,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Clinic Sync API",
        description = "Tenant-scoped clinic records, live snapshots and webhook ingestion",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
