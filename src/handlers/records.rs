//! # Record Handlers
//!
//! Snapshot reads and user mutations on the authenticated tenant's collections.
//! Writes go through the change-log writer, which also wakes live subscriptions.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{SnapshotParams, parse_collection};
use crate::auth::AuthenticatedTenant;
use crate::error::{ApiError, confirmation_required};
use crate::models::{NewRecord, Record, RecordPatch};
use crate::server::AppState;
use crate::store::Snapshot;
use crate::writer::DeleteConfirmation;

/// Path parameters for a single record
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct RecordPath {
    /// `patients`, `funnel` or `webhook_logs`
    pub collection: String,
    /// Record identifier
    pub id: String,
}

/// Query parameters for deletes
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteParams {
    /// Must be `true`; deletes are irreversible
    #[serde(default)]
    pub confirm: bool,
}

/// Current snapshot of a collection
#[utoipa::path(
    get,
    path = "/collections/{collection}/records",
    security(("bearer_auth" = [])),
    params(("collection" = String, Path, description = "patients, funnel or webhook_logs"), SnapshotParams),
    responses(
        (status = 200, description = "Ordered snapshot", body = serde_json::Value),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown collection", body = ApiError)
    ),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    Path(collection): Path<String>,
    params: Result<Query<SnapshotParams>, QueryRejection>,
) -> Result<Json<Snapshot>, ApiError> {
    let collection = parse_collection(&collection)?;
    let Query(params) = params?;
    let query = params.into_query(collection)?;

    let snapshot = state
        .relay
        .snapshot(&tenant.collection(collection), &query)
        .await?;
    Ok(Json(snapshot))
}

/// Create a record
#[utoipa::path(
    post,
    path = "/collections/{collection}/records",
    security(("bearer_auth" = [])),
    params(("collection" = String, Path, description = "patients or funnel")),
    request_body(content = serde_json::Value, description = "Record fields; `status` must be one of the collection's labels"),
    responses(
        (status = 201, description = "Record created", body = serde_json::Value),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Collection is append-only", body = ApiError)
    ),
    tag = "records"
)]
pub async fn create_record(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    Path(collection): Path<String>,
    payload: Result<Json<NewRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    let collection = parse_collection(&collection)?;
    let Json(new_record) = payload?;

    let record = state
        .writer
        .create(&tenant.collection(collection), new_record)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Merge fields into a record
#[utoipa::path(
    patch,
    path = "/collections/{collection}/records/{id}",
    security(("bearer_auth" = [])),
    params(RecordPath),
    request_body(content = serde_json::Value, description = "Fields to merge; null removes a field"),
    responses(
        (status = 200, description = "Merged record", body = serde_json::Value),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Collection is append-only", body = ApiError),
        (status = 404, description = "Record not found", body = ApiError)
    ),
    tag = "records"
)]
pub async fn update_record(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    Path(path): Path<RecordPath>,
    payload: Result<Json<RecordPatch>, JsonRejection>,
) -> Result<Json<Record>, ApiError> {
    let collection = parse_collection(&path.collection)?;
    let Json(patch) = payload?;

    let record = state
        .writer
        .update(&tenant.collection(collection), &path.id, patch)
        .await?;
    Ok(Json(record))
}

/// Delete a record (requires `confirm=true`)
#[utoipa::path(
    delete,
    path = "/collections/{collection}/records/{id}",
    security(("bearer_auth" = [])),
    params(RecordPath, DeleteParams),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 400, description = "Confirmation missing", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Collection is append-only", body = ApiError),
        (status = 404, description = "Record not found", body = ApiError)
    ),
    tag = "records"
)]
pub async fn delete_record(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    Path(path): Path<RecordPath>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let collection = parse_collection(&path.collection)?;
    let Query(params) = params?;
    let confirmation = DeleteConfirmation::from_flag(params.confirm).ok_or_else(confirmation_required)?;

    state
        .writer
        .delete(&tenant.collection(collection), &path.id, confirmation)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
