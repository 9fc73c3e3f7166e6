//! The closed set of tenant collections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::deal::DealStatus;
use super::patient::PatientStatus;

/// Entries shown by the webhook log viewer when no explicit limit is requested.
pub const WEBHOOK_LOG_VIEW_LIMIT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown collection '{0}' (expected one of: patients, funnel, webhook_logs)")]
pub struct UnknownCollection(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Patients,
    Funnel,
    WebhookLogs,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Patients,
        Collection::Funnel,
        Collection::WebhookLogs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::Funnel => "funnel",
            Collection::WebhookLogs => "webhook_logs",
        }
    }

    /// Webhook logs are only ever written by ingestion.
    pub fn is_append_only(self) -> bool {
        matches!(self, Collection::WebhookLogs)
    }

    /// Status labels a user may assign; empty for collections with numeric status codes.
    pub fn status_labels(self) -> &'static [&'static str] {
        match self {
            Collection::Patients => &PatientStatus::LABELS,
            Collection::Funnel => &DealStatus::LABELS,
            Collection::WebhookLogs => &[],
        }
    }

    pub fn default_status(self) -> Option<&'static str> {
        match self {
            Collection::Patients => Some(PatientStatus::Lead.label()),
            Collection::Funnel => Some(DealStatus::Interessados.label()),
            Collection::WebhookLogs => None,
        }
    }

    pub fn accepts_status(self, label: &str) -> bool {
        self.status_labels().contains(&label)
    }

    /// Cap applied to snapshots when the caller does not ask for one.
    pub fn default_limit(self) -> Option<u64> {
        match self {
            Collection::WebhookLogs => Some(WEBHOOK_LOG_VIEW_LIMIT),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}
