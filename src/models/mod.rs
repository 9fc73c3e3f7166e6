//! # Data Models
//!
//! Tenant identity, collections, records and the typed views the dashboard screens use.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod collection;
pub mod deal;
pub mod document;
pub mod patient;
pub mod record;
pub mod tenant;
pub mod webhook_log;

pub use collection::Collection;
pub use deal::{Deal, DealStatus};
pub use document::{NewRecord, Record, RecordDraft, RecordPatch, RecordStatus};
pub use patient::{Patient, PatientStatus};
pub use record::Entity as RecordEntity;
pub use tenant::{CollectionPath, TenantId, TenantIdError};
pub use webhook_log::{NewWebhookLog, WebhookLog, WebhookPayload};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "clinic-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
