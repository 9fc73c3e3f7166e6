//! In-memory implementation of the tenant store.
//!
//! Not durable: all state is lost on restart, and separate processes do not share it.
//! Collections are kept per [`CollectionPath`] under one `tokio::sync::RwLock`; writes are
//! serialized, reads run concurrently. [`MemoryStore::set_available`] simulates an outage
//! so callers can exercise their store-failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SnapshotQuery, StoreError, StoreResult, TenantStore};
use crate::models::{CollectionPath, Record, RecordDraft, RecordPatch};

#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionPath, Vec<Record>>>,
    next_seq: AtomicI64,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_seq: AtomicI64::new(1),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store is marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert(&self, path: &CollectionPath, draft: RecordDraft) -> StoreResult<Record> {
        self.ensure_available()?;
        let record = Record {
            id: Uuid::new_v4().to_string(),
            status: draft.status,
            created_at: draft.created_at,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            fields: draft.fields,
        };
        let mut collections = self.collections.write().await;
        collections
            .entry(path.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Record> {
        self.ensure_available()?;
        let collections = self.collections.read().await;
        collections
            .get(path)
            .and_then(|records| records.iter().find(|record| record.id == id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(path, id))
    }

    async fn merge(
        &self,
        path: &CollectionPath,
        id: &str,
        patch: &RecordPatch,
    ) -> StoreResult<Record> {
        self.ensure_available()?;
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(path)
            .and_then(|records| records.iter_mut().find(|record| record.id == id))
            .ok_or_else(|| StoreError::not_found(path, id))?;
        record.apply_patch(patch);
        Ok(record.clone())
    }

    async fn remove(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        self.ensure_available()?;
        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(path)
            .ok_or_else(|| StoreError::not_found(path, id))?;
        let before = records.len();
        records.retain(|record| record.id != id);
        if records.len() == before {
            return Err(StoreError::not_found(path, id));
        }
        Ok(())
    }

    async fn query(
        &self,
        path: &CollectionPath,
        query: &SnapshotQuery,
    ) -> StoreResult<Vec<Record>> {
        self.ensure_available()?;
        let collections = self.collections.read().await;
        let records = collections.get(path).cloned().unwrap_or_default();
        Ok(query.apply(records))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, RecordStatus, TenantId};
    use chrono::Utc;
    use serde_json::{Map, json};

    fn draft(name: &str) -> RecordDraft {
        let mut fields = Map::new();
        fields.insert("name".into(), json!(name));
        RecordDraft {
            status: RecordStatus::label("Lead"),
            fields,
            created_at: Utc::now(),
        }
    }

    fn patients(tenant: &str) -> CollectionPath {
        TenantId::parse(tenant)
            .unwrap()
            .collection(Collection::Patients)
    }

    #[tokio::test]
    async fn tenants_never_see_each_other() {
        let store = MemoryStore::new();
        let a = patients("clinicA");
        let b = patients("clinicB");

        let written = store.insert(&a, draft("Ana")).await.unwrap();

        assert!(store.query(&b, &SnapshotQuery::default()).await.unwrap().is_empty());
        assert!(matches!(
            store.get(&b, &written.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.remove(&b, &written.id).await.is_err());
        assert_eq!(store.query(&a, &SnapshotQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn assigns_unique_ids_and_increasing_seq() {
        let store = MemoryStore::new();
        let path = patients("clinicA");
        let first = store.insert(&path, draft("Ana")).await.unwrap();
        let second = store.insert(&path, draft("Bia")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.seq > first.seq);

        let listed = store.query(&path, &SnapshotQuery::default()).await.unwrap();
        assert_eq!(listed[0].id, second.id);
    }

    #[tokio::test]
    async fn merge_and_remove() {
        let store = MemoryStore::new();
        let path = patients("clinicA");
        let created = store.insert(&path, draft("Ana")).await.unwrap();

        let patch = RecordPatch {
            status: Some("Agendado".into()),
            fields: Map::new(),
        };
        let merged = store.merge(&path, &created.id, &patch).await.unwrap();
        assert_eq!(merged.status, RecordStatus::label("Agendado"));
        assert_eq!(merged.created_at, created.created_at);

        store.remove(&path, &created.id).await.unwrap();
        assert!(store.get(&path, &created.id).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        let path = patients("clinicA");
        store.set_available(false);
        assert!(matches!(
            store.insert(&path, draft("Ana")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.health_check().await.is_err());
        store.set_available(true);
        assert!(store.health_check().await.is_ok());
    }
}
