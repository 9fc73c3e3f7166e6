//! # API Handlers
//!
//! HTTP endpoint handlers for the clinic dashboard API.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, validation_error};
use crate::models::{Collection, ServiceInfo};
use crate::server::AppState;
use crate::store::{SortOrder, SnapshotQuery};

pub mod dashboard;
pub mod records;
pub mod streams;

/// Upper bound accepted for the `limit` query parameter.
pub const MAX_SNAPSHOT_LIMIT: u64 = 1000;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Process is alive")),
    tag = "root"
)]
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe; checks that the store answers
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Store reachable"),
        (status = 503, description = "Store unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn readyz(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.store.health_check().await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "ready", "store": state.store.backend_name() })),
    ))
}

/// Query parameters shared by snapshot reads and live streams
#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct SnapshotParams {
    /// `desc` (newest first, default) or `asc`
    pub order: Option<String>,
    /// Maximum number of records (1..=1000); webhook logs default to 50
    pub limit: Option<u64>,
    /// Only records with this status label
    pub status: Option<String>,
}

impl SnapshotParams {
    pub fn into_query(self, collection: Collection) -> Result<SnapshotQuery, ApiError> {
        let order = match self.order.as_deref() {
            None => SortOrder::default(),
            Some(raw) => raw.parse::<SortOrder>().map_err(|_| {
                validation_error(
                    "Invalid order",
                    json!({ "order": "must be 'asc' or 'desc'" }),
                )
            })?,
        };

        let limit = self.limit.or_else(|| collection.default_limit());
        if let Some(limit) = limit
            && !(1..=MAX_SNAPSHOT_LIMIT).contains(&limit)
        {
            return Err(validation_error(
                "Invalid limit",
                json!({ "limit": format!("must be between 1 and {MAX_SNAPSHOT_LIMIT}") }),
            ));
        }

        Ok(SnapshotQuery {
            order,
            limit,
            status: self.status.filter(|status| !status.is_empty()),
        })
    }
}

/// Resolves the `{collection}` path segment.
pub fn parse_collection(raw: &str) -> Result<Collection, ApiError> {
    Ok(raw.parse::<Collection>()?)
}
