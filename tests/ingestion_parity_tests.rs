//! The dashboard server's inline ingestion and the standalone webhook server must be
//! indistinguishable to webhook senders and must store identical log shapes.

use std::sync::Arc;

use anyhow::Result;
use clinic_sync::models::{Collection, WebhookLog, WebhookPayload};
use clinic_sync::server::{AppState, create_app, create_webhook_app};
use clinic_sync::store::{SnapshotQuery, TenantStore};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestServer, setup_test_store, tenant, test_config};

struct Servers {
    store: Arc<dyn TenantStore>,
    inline: TestServer,
    standalone: TestServer,
}

async fn spawn_servers() -> Result<Servers> {
    let store = setup_test_store().await?;

    let dashboard_state = AppState::new(test_config(), store.clone());
    let inline = TestServer::spawn(
        create_app(dashboard_state.clone()),
        dashboard_state.shutdown.clone(),
    )
    .await?;

    let webhook_state = AppState::new(test_config(), store.clone());
    let standalone = TestServer::spawn(
        create_webhook_app(webhook_state.ingestion_state()),
        webhook_state.shutdown.clone(),
    )
    .await?;

    Ok(Servers {
        store,
        inline,
        standalone,
    })
}

struct Observed {
    status: StatusCode,
    allow_origin: Option<String>,
    body: Value,
}

async fn post(
    client: &reqwest::Client,
    url: String,
    body: impl Into<reqwest::Body>,
    user_agent: Option<&str>,
) -> Result<Observed> {
    let mut request = client
        .post(url)
        .header("content-type", "application/json")
        .body(body);
    if let Some(user_agent) = user_agent {
        request = request.header("user-agent", user_agent);
    }
    let response = request.send().await?;
    Ok(Observed {
        status: response.status(),
        allow_origin: response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: response.json().await?,
    })
}

async fn logs(store: &Arc<dyn TenantStore>, tenant_id: &str) -> Result<Vec<WebhookLog>> {
    let path = tenant(tenant_id).collection(Collection::WebhookLogs);
    Ok(store
        .query(&path, &SnapshotQuery::oldest_first())
        .await?
        .iter()
        .filter_map(WebhookLog::from_record)
        .collect())
}

fn assert_same_response(inline: &Observed, standalone: &Observed) {
    assert_eq!(inline.status, standalone.status);
    assert_eq!(inline.allow_origin.as_deref(), Some("*"));
    assert_eq!(inline.allow_origin, standalone.allow_origin);

    let keys = |body: &Value| {
        let mut keys: Vec<String> = body
            .as_object()
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    };
    assert_eq!(keys(&inline.body), keys(&standalone.body));
}

fn assert_same_log(inline: &WebhookLog, standalone: &WebhookLog) {
    assert_eq!(inline.method, standalone.method);
    assert_eq!(inline.source, standalone.source);
    assert_eq!(inline.status, standalone.status);
    assert_eq!(inline.payload, standalone.payload);
    assert!(inline.processed_at.is_some());
    assert!(standalone.processed_at.is_some());
}

#[tokio::test]
async fn both_adapters_acknowledge_and_log_identically() -> Result<()> {
    let servers = spawn_servers().await?;
    let client = reqwest::Client::new();

    let cases: Vec<(&str, Option<&str>)> = vec![
        (r#"{"lead":"Jane Doe"}"#, Some("Typeform-Webhooks/1.0")),
        ("not-json", None),
        ("", Some("curl/8.0")),
    ];

    for (body, user_agent) in &cases {
        let inline = post(
            &client,
            servers.inline.url("/webhook/parity-inline"),
            body.to_string(),
            *user_agent,
        )
        .await?;
        let standalone = post(
            &client,
            servers.standalone.url("/webhook/parity-standalone"),
            body.to_string(),
            *user_agent,
        )
        .await?;

        assert_eq!(inline.status, StatusCode::OK);
        assert_eq!(inline.body["received"], true);
        assert!(inline.body["timestamp"].is_string());
        assert_same_response(&inline, &standalone);
    }

    let inline_logs = logs(&servers.store, "parity-inline").await?;
    let standalone_logs = logs(&servers.store, "parity-standalone").await?;
    assert_eq!(inline_logs.len(), cases.len());
    assert_eq!(standalone_logs.len(), cases.len());
    for (inline, standalone) in inline_logs.iter().zip(&standalone_logs) {
        assert_same_log(inline, standalone);
    }

    assert_eq!(inline_logs[0].status, 200);
    assert_eq!(inline_logs[0].source, "Typeform-Webhooks/1.0");
    assert_eq!(
        inline_logs[0].payload,
        WebhookPayload::Parsed(json!({"lead": "Jane Doe"}))
    );
    assert_eq!(inline_logs[1].status, 400);
    assert_eq!(inline_logs[1].source, "Unknown External Source");
    assert_eq!(
        inline_logs[1].payload,
        WebhookPayload::malformed("Invalid JSON body", "not-json")
    );
    assert_eq!(inline_logs[2].status, 400);

    servers.inline.shutdown().await?;
    servers.standalone.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn both_adapters_answer_preflight_identically() -> Result<()> {
    let servers = spawn_servers().await?;
    let client = reqwest::Client::new();

    for server in [&servers.inline, &servers.standalone] {
        let response = client
            .request(reqwest::Method::OPTIONS, server.url("/webhook/clinic123"))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(
            headers["access-control-allow-headers"],
            "Content-Type, Authorization"
        );
        assert!(response.text().await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn oversized_bodies_are_logged_as_malformed() -> Result<()> {
    let servers = spawn_servers().await?;
    let client = reqwest::Client::new();
    let big = format!(r#"{{"blob":"{}"}}"#, "x".repeat(8 * 1024));

    let inline = post(&client, servers.inline.url("/webhook/big-inline"), big.clone(), None).await?;
    let standalone =
        post(&client, servers.standalone.url("/webhook/big-standalone"), big, None).await?;
    assert_eq!(inline.status, StatusCode::OK);
    assert_same_response(&inline, &standalone);

    let inline_logs = logs(&servers.store, "big-inline").await?;
    let standalone_logs = logs(&servers.store, "big-standalone").await?;
    assert_same_log(&inline_logs[0], &standalone_logs[0]);
    assert_eq!(
        inline_logs[0].payload,
        WebhookPayload::malformed("Request body too large", "")
    );
    Ok(())
}

#[tokio::test]
async fn webhook_server_exposes_only_ingestion() -> Result<()> {
    let servers = spawn_servers().await?;
    let client = reqwest::Client::new();

    let health = client.get(servers.standalone.url("/healthz")).send().await?;
    assert_eq!(health.status(), StatusCode::OK);

    let records = client
        .get(servers.standalone.url("/collections/patients/records"))
        .send()
        .await?;
    assert_eq!(records.status(), StatusCode::NOT_FOUND);
    Ok(())
}
