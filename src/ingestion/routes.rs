//! HTTP transport for webhook ingestion.
//!
//! `POST /webhook/{tenant_id}` is public: it never authenticates and answers every
//! request, logging malformed bodies rather than rejecting them.

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Path, State, rejection::PathRejection},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, USER_AGENT,
        },
    },
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::debug;

use super::{IngestFailure, InboundBody, InboundWebhook, WebhookAck, ingest};
use crate::writer::ChangeLogWriter;

/// Route pattern shared by every transport that serves ingestion.
pub const WEBHOOK_ROUTE: &str = "/webhook/{tenant_id}";

#[derive(Clone)]
pub struct IngestionState {
    pub writer: ChangeLogWriter,
    pub max_body_bytes: usize,
}

impl IngestionState {
    pub fn new(writer: ChangeLogWriter, max_body_bytes: usize) -> Self {
        Self {
            writer,
            max_body_bytes,
        }
    }
}

/// Ingestion routes with their state applied, ready to be merged into any server.
pub fn router(state: IngestionState) -> Router {
    Router::new()
        .route(WEBHOOK_ROUTE, post(receive_webhook).options(preflight))
        .with_state(state)
}

fn allow_any_origin() -> [(axum::http::HeaderName, HeaderValue); 1] {
    [(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))]
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> InboundBody {
    if declared_length(headers).is_some_and(|length| length > limit) {
        return InboundBody::Oversized;
    }
    match to_bytes(body, limit).await {
        Ok(bytes) => InboundBody::Complete(bytes),
        Err(err) => {
            debug!(error = %err, "Failed to read webhook body");
            // Without a declared length, exceeding the limit surfaces as a read error.
            if declared_length(headers).is_none() {
                InboundBody::Oversized
            } else {
                InboundBody::Unreadable
            }
        }
    }
}

/// Receive a webhook for a tenant
#[utoipa::path(
    post,
    path = "/webhook/{tenant_id}",
    tag = "ingestion",
    params(("tenant_id" = String, Path, description = "Tenant (clinic) identifier")),
    request_body(content = serde_json::Value, description = "Any payload; non-JSON bodies are logged as malformed", content_type = "application/json"),
    responses(
        (status = 200, description = "Webhook received and logged", body = WebhookAck),
        (status = 500, description = "Webhook log could not be stored", body = IngestFailure),
    )
)]
pub async fn receive_webhook(
    State(state): State<IngestionState>,
    tenant_id: Result<Path<String>, PathRejection>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Path(tenant_id) = match tenant_id {
        Ok(path) => path,
        // Undecodable ids get the same answer as any other unusable tenant id.
        Err(rejection) => {
            debug!(error = %rejection, "Webhook tenant id could not be decoded");
            let failure = IngestFailure {
                error: "Internal Server Error".to_string(),
                details: rejection.body_text(),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, allow_any_origin(), Json(failure))
                .into_response();
        }
    };
    let source = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = read_body(&headers, body, state.max_body_bytes).await;

    let inbound = InboundWebhook {
        tenant: tenant_id,
        method: method.as_str().to_string(),
        source,
        body,
    };

    match ingest(&state.writer, inbound).await {
        Ok(outcome) => (StatusCode::OK, allow_any_origin(), Json(outcome.ack)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            allow_any_origin(),
            Json(err.to_failure()),
        )
            .into_response(),
    }
}

/// CORS preflight for the webhook endpoint
#[utoipa::path(
    options,
    path = "/webhook/{tenant_id}",
    tag = "ingestion",
    params(("tenant_id" = String, Path, description = "Tenant (clinic) identifier")),
    responses((status = 200, description = "Preflight accepted"))
)]
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ),
            (
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type, Authorization"),
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, TenantId, WebhookLog, WebhookPayload};
    use crate::relay::ChangeHub;
    use crate::store::{MemoryStore, SnapshotQuery, TenantStore};
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>, max_body_bytes: usize) -> Router {
        let dyn_store: Arc<dyn TenantStore> = store;
        let writer = ChangeLogWriter::new(dyn_store, ChangeHub::new(8));
        router(IngestionState::new(writer, max_body_bytes))
    }

    async fn post_webhook(app: Router, tenant: &str, body: &'static str) -> Response {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhook/{tenant}"))
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn logs(store: &MemoryStore, tenant: &str) -> Vec<WebhookLog> {
        let path = TenantId::parse(tenant)
            .unwrap()
            .collection(Collection::WebhookLogs);
        store
            .query(&path, &SnapshotQuery::default())
            .await
            .unwrap()
            .iter()
            .filter_map(WebhookLog::from_record)
            .collect()
    }

    #[tokio::test]
    async fn json_body_is_acknowledged_and_logged() {
        let store = Arc::new(MemoryStore::new());
        let response =
            post_webhook(app(store.clone(), 1024), "clinic123", r#"{"lead":"Jane Doe"}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert_eq!(body["received"], true);
        assert!(body["timestamp"].is_string());

        let logs = logs(&store, "clinic123").await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, 200);
        assert_eq!(
            logs[0].payload,
            WebhookPayload::Parsed(json!({"lead": "Jane Doe"}))
        );
        assert_eq!(logs[0].response, body);
    }

    #[tokio::test]
    async fn malformed_body_still_gets_200() {
        let store = Arc::new(MemoryStore::new());
        let response = post_webhook(app(store.clone(), 1024), "clinic123", "not-json").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["received"], true);

        let logs = logs(&store, "clinic123").await;
        assert_eq!(logs[0].status, 400);
        assert_eq!(
            logs[0].payload,
            WebhookPayload::malformed("Invalid JSON body", "not-json")
        );
    }

    #[tokio::test]
    async fn oversized_body_is_logged_as_malformed() {
        let store = Arc::new(MemoryStore::new());
        let response = post_webhook(app(store.clone(), 8), "clinic123", r#"{"lead":"Jane Doe"}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        let logs = logs(&store, "clinic123").await;
        assert_eq!(
            logs[0].payload,
            WebhookPayload::malformed("Request body too large", "")
        );
    }

    #[tokio::test]
    async fn source_comes_from_user_agent() {
        let store = Arc::new(MemoryStore::new());
        let response = app(store.clone(), 1024)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/clinic123")
                    .header("user-agent", "Typeform-Webhooks/1.0")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        post_webhook(app(store.clone(), 1024), "clinic123", "{}").await;

        let sources: Vec<_> = logs(&store, "clinic123")
            .await
            .into_iter()
            .map(|log| log.source)
            .collect();
        assert!(sources.contains(&"Typeform-Webhooks/1.0".to_string()));
        assert!(sources.contains(&"Unknown External Source".to_string()));
    }

    #[tokio::test]
    async fn store_outage_returns_500_with_details() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let response = post_webhook(app(store, 1024), "clinic123", "{}").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert!(body["details"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn preflight_advertises_cors() {
        let store = Arc::new(MemoryStore::new());
        let response = app(store, 1024)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/webhook/clinic123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(
            headers[ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn long_tenant_ids_are_accepted() {
        let store = Arc::new(MemoryStore::new());
        let long = "a".repeat(200);
        let response = post_webhook(app(store.clone(), 1024), &long, r#"{"lead":"x"}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(logs(&store, &long).await.len(), 1);
    }

    #[tokio::test]
    async fn unusable_tenant_id_answers_500_with_cors() {
        let store = Arc::new(MemoryStore::new());
        let response = post_webhook(app(store, 1024), "clinic%2Fother", "{}").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert!(body["details"].as_str().unwrap().contains("'/'"));
    }
}
