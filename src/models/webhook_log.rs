//! Webhook log entries written by ingestion.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::document::{Record, RecordStatus};

/// Stored status of a log whose body parsed as JSON.
pub const LOG_STATUS_PARSED: u16 = 200;
/// Stored status of a log whose body could not be used.
pub const LOG_STATUS_MALFORMED: u16 = 400;

/// The body of an inbound webhook as it is kept in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Parsed(Value),
    Malformed {
        error: String,
        #[serde(rename = "rawBody")]
        raw_body: String,
    },
}

impl WebhookPayload {
    pub fn malformed(error: impl Into<String>, raw_body: impl Into<String>) -> Self {
        WebhookPayload::Malformed {
            error: error.into(),
            raw_body: raw_body.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, WebhookPayload::Malformed { .. })
    }

    /// Outcome code recorded alongside the payload.
    pub fn log_status(&self) -> u16 {
        if self.is_malformed() {
            LOG_STATUS_MALFORMED
        } else {
            LOG_STATUS_PARSED
        }
    }

    fn to_value(&self) -> Value {
        match self {
            WebhookPayload::Parsed(value) => value.clone(),
            WebhookPayload::Malformed { error, raw_body } => {
                json!({ "error": error, "rawBody": raw_body })
            }
        }
    }

    fn from_stored(status: Option<u16>, value: Value) -> Self {
        if status == Some(LOG_STATUS_MALFORMED) {
            let error = value.get("error").and_then(Value::as_str);
            let raw_body = value.get("rawBody").and_then(Value::as_str);
            if let (Some(error), Some(raw_body)) = (error, raw_body) {
                return WebhookPayload::malformed(error, raw_body);
            }
        }
        WebhookPayload::Parsed(value)
    }
}

/// Everything ingestion knows about one request, ready to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookLog {
    pub method: String,
    pub source: String,
    pub payload: WebhookPayload,
    pub response: Value,
    pub processed_at: DateTime<Utc>,
}

impl NewWebhookLog {
    pub fn status(&self) -> RecordStatus {
        RecordStatus::Code(self.payload.log_status())
    }

    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("method".into(), Value::String(self.method));
        fields.insert("source".into(), Value::String(self.source));
        fields.insert("payload".into(), self.payload.to_value());
        fields.insert("response".into(), self.response);
        fields.insert(
            "processedAt".into(),
            Value::String(self.processed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields
    }
}

/// Typed view over a `webhook_logs` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub id: String,
    pub method: String,
    pub source: String,
    pub status: u16,
    pub payload: WebhookPayload,
    pub response: Value,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookLog {
    pub fn from_record(record: &Record) -> Option<Self> {
        let status = record.status.as_code()?;
        let text = |key: &str| record.str_field(key).unwrap_or_default().to_string();
        Some(Self {
            id: record.id.clone(),
            method: text("method"),
            source: text("source"),
            status,
            payload: WebhookPayload::from_stored(
                Some(status),
                record.field("payload").cloned().unwrap_or(Value::Null),
            ),
            response: record.field("response").cloned().unwrap_or(Value::Null),
            processed_at: record
                .str_field("processedAt")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc)),
            created_at: record.created_at,
        })
    }
}
