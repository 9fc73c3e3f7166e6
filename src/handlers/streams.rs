//! # Live Streams
//!
//! Server-sent events carrying full snapshots of a collection. The stream owns its
//! subscription, so a disconnecting client releases it.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use super::{SnapshotParams, parse_collection};
use crate::auth::AuthenticatedTenant;
use crate::error::ApiError;
use crate::relay::Subscription;
use crate::server::AppState;
use crate::store::Snapshot;

pub const SNAPSHOT_EVENT: &str = "snapshot";
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Live snapshots of a collection as `text/event-stream`
#[utoipa::path(
    get,
    path = "/collections/{collection}/stream",
    security(("bearer_auth" = [])),
    params(("collection" = String, Path, description = "patients, funnel or webhook_logs"), SnapshotParams),
    responses(
        (status = 200, description = "Stream of `snapshot` events", content_type = "text/event-stream", body = String),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown collection", body = ApiError)
    ),
    tag = "records"
)]
pub async fn stream_records(
    State(state): State<AppState>,
    tenant: AuthenticatedTenant,
    Path(collection): Path<String>,
    params: Result<Query<SnapshotParams>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let collection = parse_collection(&collection)?;
    let Query(params) = params?;
    let query = params.into_query(collection)?;

    let (subscription, snapshots) = state
        .relay
        .subscribe_channel(tenant.collection(collection), query);
    debug!(subscription_id = subscription.id(), "SSE stream opened");

    Ok(Sse::new(snapshot_events(subscription, snapshots))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// Ends when the subscription's watcher stops, which also happens on server shutdown.
fn snapshot_events(
    subscription: Subscription,
    snapshots: UnboundedReceiver<Snapshot>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(
        (subscription, snapshots),
        |(subscription, mut snapshots)| async move {
            let snapshot = snapshots.recv().await?;
            let event = Event::default().event(SNAPSHOT_EVENT).json_data(&snapshot);
            Some((event, (subscription, snapshots)))
        },
    )
}
