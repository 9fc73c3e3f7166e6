//! Change-log writer: the only component that mutates tenant collections.
//!
//! Stamps `createdAt`, validates statuses, keeps webhook logs append-only, and announces
//! every committed write on the [`ChangeHub`].

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tracing::{info, instrument};

use crate::models::document::strip_reserved;
use crate::models::{
    Collection, CollectionPath, NewRecord, NewWebhookLog, Record, RecordDraft, RecordPatch,
    RecordStatus, TenantId,
};
use crate::relay::{ChangeHub, ChangeKind, ChangeNotice};
use crate::store::{StoreError, TenantStore};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("collection '{0}' is append-only")]
    AppendOnly(Collection),
    #[error("status '{status}' is not valid for collection '{collection}'")]
    InvalidStatus { collection: Collection, status: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Proof that the caller explicitly confirmed an irreversible delete.
#[derive(Debug)]
pub struct DeleteConfirmation {
    _confirmed: (),
}

impl DeleteConfirmation {
    pub fn confirmed() -> Self {
        Self { _confirmed: () }
    }

    pub fn from_flag(confirm: bool) -> Option<Self> {
        confirm.then(Self::confirmed)
    }
}

#[derive(Clone)]
pub struct ChangeLogWriter {
    store: Arc<dyn TenantStore>,
    hub: ChangeHub,
}

impl ChangeLogWriter {
    pub fn new(store: Arc<dyn TenantStore>, hub: ChangeHub) -> Self {
        Self { store, hub }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    #[instrument(skip_all, fields(path = %path))]
    pub async fn create(
        &self,
        path: &CollectionPath,
        new_record: NewRecord,
    ) -> Result<Record, WriterError> {
        let collection = ensure_mutable(path)?;
        let status = resolve_status(collection, new_record.status)?;
        let mut fields = new_record.fields;
        strip_reserved(&mut fields);

        let draft = RecordDraft {
            status,
            fields,
            created_at: Utc::now(),
        };
        let record = self.store.insert(path, draft).await?;
        self.announce(path, ChangeKind::Created, &record.id, "create");
        info!(record_id = %record.id, "Record created");
        Ok(record)
    }

    #[instrument(skip_all, fields(path = %path, record_id = %id))]
    pub async fn update(
        &self,
        path: &CollectionPath,
        id: &str,
        patch: RecordPatch,
    ) -> Result<Record, WriterError> {
        let collection = ensure_mutable(path)?;
        if let Some(status) = &patch.status {
            validate_status(collection, status)?;
        }

        let record = self.store.merge(path, id, &patch).await?;
        self.announce(path, ChangeKind::Updated, &record.id, "update");
        info!("Record updated");
        Ok(record)
    }

    #[instrument(skip_all, fields(path = %path, record_id = %id))]
    pub async fn delete(
        &self,
        path: &CollectionPath,
        id: &str,
        _confirmation: DeleteConfirmation,
    ) -> Result<(), WriterError> {
        ensure_mutable(path)?;
        self.store.remove(path, id).await?;
        self.announce(path, ChangeKind::Deleted, id, "delete");
        info!("Record deleted");
        Ok(())
    }

    /// Appends one entry to the tenant's webhook log.
    #[instrument(skip_all, fields(tenant_id = %tenant))]
    pub async fn append_log(
        &self,
        tenant: &TenantId,
        entry: NewWebhookLog,
    ) -> Result<Record, WriterError> {
        let path = tenant.collection(Collection::WebhookLogs);
        let draft = RecordDraft {
            status: entry.status(),
            fields: entry.into_fields(),
            created_at: Utc::now(),
        };
        let record = self.store.insert(&path, draft).await?;
        self.announce(&path, ChangeKind::Created, &record.id, "append");
        info!(record_id = %record.id, "Webhook log appended");
        Ok(record)
    }

    fn announce(&self, path: &CollectionPath, kind: ChangeKind, id: &str, op: &'static str) {
        counter!("records_written_total", "op" => op).increment(1);
        self.hub.publish(
            path,
            ChangeNotice {
                kind,
                record_id: id.to_string(),
            },
        );
    }
}

fn ensure_mutable(path: &CollectionPath) -> Result<Collection, WriterError> {
    let collection = path.collection();
    if collection.is_append_only() {
        return Err(WriterError::AppendOnly(collection));
    }
    Ok(collection)
}

fn validate_status(collection: Collection, status: &str) -> Result<(), WriterError> {
    if collection.accepts_status(status) {
        Ok(())
    } else {
        Err(WriterError::InvalidStatus {
            collection,
            status: status.to_string(),
        })
    }
}

fn resolve_status(
    collection: Collection,
    requested: Option<String>,
) -> Result<RecordStatus, WriterError> {
    match requested {
        Some(status) => {
            validate_status(collection, &status)?;
            Ok(RecordStatus::Label(status))
        }
        None => collection
            .default_status()
            .map(RecordStatus::label)
            .ok_or(WriterError::AppendOnly(collection)),
    }
}
