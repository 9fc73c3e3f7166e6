//! Live snapshots over real servers: writes made through the API or by the standalone
//! webhook server reach subscribers of the dashboard's relay.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clinic_sync::models::Collection;
use clinic_sync::server::{AppState, create_app, create_webhook_app};
use clinic_sync::store::{Snapshot, SnapshotQuery};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, timeout};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TOKEN_A, TestServer, setup_test_store, tenant, test_config};

const WAIT: Duration = Duration::from_secs(3);

async fn wait_for(
    snapshots: &mut UnboundedReceiver<Snapshot>,
    predicate: impl Fn(&Snapshot) -> bool,
) -> Result<Snapshot> {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let snapshot = timeout(remaining, snapshots.recv())
            .await
            .context("timed out waiting for snapshot")?
            .context("subscription ended")?;
        if predicate(&snapshot) {
            return Ok(snapshot);
        }
    }
}

fn names(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .records
        .iter()
        .filter_map(|record| record.str_field("name").map(str::to_string))
        .collect()
}

#[tokio::test]
async fn api_writes_reach_subscribers_in_order() -> Result<()> {
    let store = setup_test_store().await?;
    let state = AppState::new(test_config(), store);
    let relay = state.relay.clone();
    let server = TestServer::spawn(create_app(state.clone()), state.shutdown.clone()).await?;
    let client = reqwest::Client::new();

    let path = tenant("clinic-a").collection(Collection::Patients);
    let (subscription, mut snapshots) = relay.subscribe_channel(path, SnapshotQuery::default());
    wait_for(&mut snapshots, |snapshot| snapshot.records.is_empty()).await?;

    let mut ids = Vec::new();
    for name in ["Ana", "Bia", "Caio"] {
        let created: Value = client
            .post(server.url("/collections/patients/records"))
            .bearer_auth(TOKEN_A)
            .json(&json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ids.push(created["id"].as_str().unwrap_or_default().to_string());
    }

    let full = wait_for(&mut snapshots, |snapshot| snapshot.records.len() == 3).await?;
    assert_eq!(names(&full), vec!["Caio", "Bia", "Ana"]);

    let response = client
        .delete(server.url(&format!("/collections/patients/records/{}?confirm=true", ids[1])))
        .bearer_auth(TOKEN_A)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let after_delete = wait_for(&mut snapshots, |snapshot| snapshot.records.len() == 2).await?;
    assert_eq!(names(&after_delete), vec!["Caio", "Ana"]);

    subscription.dispose();
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn standalone_ingestion_is_picked_up_by_polling() -> Result<()> {
    let store = setup_test_store().await?;

    let dashboard = AppState::new(test_config(), store.clone());
    let webhook = AppState::new(test_config(), store);
    let webhook_server = TestServer::spawn(
        create_webhook_app(webhook.ingestion_state()),
        webhook.shutdown.clone(),
    )
    .await?;

    let path = tenant("clinic-a").collection(Collection::WebhookLogs);
    let (_subscription, mut snapshots) = dashboard
        .relay
        .subscribe_channel(path, SnapshotQuery::newest_first().with_limit(50));
    wait_for(&mut snapshots, |snapshot| snapshot.records.is_empty()).await?;

    let response = reqwest::Client::new()
        .post(webhook_server.url("/webhook/clinic-a"))
        .body(r#"{"lead":"Jane Doe"}"#)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = wait_for(&mut snapshots, |snapshot| snapshot.records.len() == 1).await?;
    assert_eq!(
        snapshot.records[0].field("payload"),
        Some(&json!({"lead": "Jane Doe"}))
    );

    webhook_server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn sse_stream_delivers_snapshots() -> Result<()> {
    let store = setup_test_store().await?;
    let state = AppState::new(test_config(), store);
    let server = TestServer::spawn(create_app(state.clone()), state.shutdown.clone()).await?;
    let client = reqwest::Client::new();

    let mut stream = client
        .get(server.url("/collections/patients/stream"))
        .bearer_auth(TOKEN_A)
        .send()
        .await?;
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(
        stream
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"))
    );

    let first = timeout(WAIT, stream.chunk()).await??.context("stream closed")?;
    let first = String::from_utf8(first.to_vec())?;
    assert!(first.contains("event: snapshot"));
    assert!(first.contains(r#""records":[]"#));

    client
        .post(server.url("/collections/patients/records"))
        .bearer_auth(TOKEN_A)
        .json(&json!({ "name": "Ana" }))
        .send()
        .await?
        .error_for_status()?;

    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(chunk) = timeout(remaining, stream.chunk()).await?? else {
            bail!("stream closed before the update arrived");
        };
        let text = String::from_utf8(chunk.to_vec())?;
        if text.contains(r#""name":"Ana""#) {
            assert!(text.contains("event: snapshot"));
            break;
        }
    }

    // Shutdown ends open streams, so the server can stop gracefully.
    state.shutdown.cancel();
    let end = timeout(WAIT, async {
        while stream.chunk().await?.is_some() {}
        Ok::<_, reqwest::Error>(())
    })
    .await;
    assert!(end.is_ok(), "stream did not end on shutdown");
    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn sse_requires_a_session() -> Result<()> {
    let store = setup_test_store().await?;
    let state = AppState::new(test_config(), store);
    let server = TestServer::spawn(create_app(state.clone()), state.shutdown.clone()).await?;

    let response = reqwest::Client::new()
        .get(server.url("/collections/patients/stream"))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
