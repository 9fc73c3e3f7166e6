//! Webhook ingestion.
//!
//! [`ingest`] is the single code path that turns an inbound webhook into a webhook log
//! entry and an acknowledgement. [`routes::router`] exposes it over HTTP; both the
//! dashboard server and the standalone webhook server mount that same router.

use axum::body::Bytes;
use chrono::{SecondsFormat, Utc};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::models::{NewWebhookLog, TenantId, TenantIdError, WebhookPayload};
use crate::writer::{ChangeLogWriter, WriterError};

pub mod routes;

pub use routes::{IngestionState, router};

/// Source recorded when the caller sends no usable `User-Agent`.
pub const UNKNOWN_SOURCE: &str = "Unknown External Source";
pub const INVALID_JSON_BODY: &str = "Invalid JSON body";
pub const BODY_TOO_LARGE: &str = "Request body too large";
pub const BODY_UNREADABLE: &str = "Request body could not be read";

/// The request body as the transport delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    Complete(Bytes),
    /// Larger than the configured limit; never buffered.
    Oversized,
    /// The transport failed while reading the body.
    Unreadable,
}

#[derive(Debug, Clone)]
pub struct InboundWebhook {
    /// Tenant id exactly as addressed by the caller.
    pub tenant: String,
    pub method: String,
    pub source: Option<String>,
    pub body: InboundBody,
}

/// Acknowledgement returned to the webhook caller and stored verbatim in the log.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// RFC 3339 receipt time
    pub timestamp: String,
}

/// Body of the 500 response when the log could not be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct IngestFailure {
    pub error: String,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub log_id: String,
    pub logged_status: u16,
    pub ack: WebhookAck,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The addressed tenant id cannot name a store location.
    #[error("cannot store webhook log for tenant: {0}")]
    UnusableTenant(#[source] TenantIdError),
    #[error("failed to persist webhook log: {0}")]
    Persist(#[source] WriterError),
}

impl IngestError {
    pub fn to_failure(&self) -> IngestFailure {
        let details = match self {
            IngestError::UnusableTenant(source) => source.to_string(),
            IngestError::Persist(source) => source.to_string(),
        };
        IngestFailure {
            error: "Internal Server Error".to_string(),
            details,
        }
    }
}

/// Parses the body into the payload to log. Anything that is not a JSON document,
/// including an empty body, is kept as text next to the parse error.
pub fn classify_payload(body: &InboundBody) -> WebhookPayload {
    match body {
        InboundBody::Complete(bytes) => match serde_json::from_slice(bytes) {
            Ok(value) => WebhookPayload::Parsed(value),
            Err(_) => {
                WebhookPayload::malformed(INVALID_JSON_BODY, String::from_utf8_lossy(bytes))
            }
        },
        InboundBody::Oversized => WebhookPayload::malformed(BODY_TOO_LARGE, ""),
        InboundBody::Unreadable => WebhookPayload::malformed(BODY_UNREADABLE, ""),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Logs one inbound webhook and produces its acknowledgement.
pub async fn ingest(
    writer: &ChangeLogWriter,
    inbound: InboundWebhook,
) -> Result<IngestOutcome, IngestError> {
    let tenant = match TenantId::parse(inbound.tenant.as_str()) {
        Ok(tenant) => tenant,
        Err(err) => {
            counter!("webhook_ingest_total", "outcome" => "failed").increment(1);
            warn!(
                tenant_id = %inbound.tenant,
                error = %err,
                "Webhook addressed to an unusable tenant id"
            );
            return Err(IngestError::UnusableTenant(err));
        }
    };
    let ack = WebhookAck {
        received: true,
        timestamp: now_rfc3339(),
    };
    let payload = classify_payload(&inbound.body);
    let logged_status = payload.log_status();
    let outcome = if payload.is_malformed() {
        "malformed"
    } else {
        "parsed"
    };
    let source = inbound
        .source
        .filter(|source| !source.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

    let entry = NewWebhookLog {
        method: inbound.method,
        source: source.clone(),
        payload,
        response: serde_json::json!({
            "received": ack.received,
            "timestamp": ack.timestamp,
        }),
        processed_at: Utc::now(),
    };

    match writer.append_log(&tenant, entry).await {
        Ok(record) => {
            counter!("webhook_ingest_total", "outcome" => outcome).increment(1);
            info!(
                tenant_id = %tenant,
                source = %source,
                outcome,
                log_id = %record.id,
                "Webhook ingested"
            );
            Ok(IngestOutcome {
                log_id: record.id,
                logged_status,
                ack,
            })
        }
        Err(err) => {
            counter!("webhook_ingest_total", "outcome" => "failed").increment(1);
            warn!(
                tenant_id = %tenant,
                source = %source,
                error = %err,
                "Failed to persist webhook log"
            );
            Err(IngestError::Persist(err))
        }
    }
}
