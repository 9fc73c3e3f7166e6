//! Tenant-scoped document store.
//!
//! Every operation takes a [`CollectionPath`]; there is no way to read or write across
//! tenants. Two backends implement [`TenantStore`]:
//! - [`database::DatabaseStore`]: durable, over SeaORM (Postgres or SQLite).
//! - [`memory::MemoryStore`]: in-process, for development and tests.

use std::cmp::Ordering;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Collection, CollectionPath, Record, RecordDraft, RecordPatch};

pub mod database;
pub mod memory;

pub use database::DatabaseStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{id}' not found in {path}")]
    NotFound { path: String, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[source] sea_orm::DbErr),
}

impl StoreError {
    pub fn not_found(path: &CollectionPath, id: &str) -> Self {
        StoreError::NotFound {
            path: path.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("invalid order '{other}' (expected asc or desc)")),
        }
    }
}

/// Filter, order and cap of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub order: SortOrder,
    pub limit: Option<u64>,
    pub status: Option<String>,
}

impl SnapshotQuery {
    /// Newest first, uncapped, unfiltered.
    pub fn newest_first() -> Self {
        Self::default()
    }

    pub fn oldest_first() -> Self {
        Self {
            order: SortOrder::Asc,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.status
            .as_deref()
            .is_none_or(|status| record.status.to_column() == status)
    }

    /// `(created_at, seq)` in the query's direction.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ascending = a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.seq.cmp(&b.seq));
        match self.order {
            SortOrder::Asc => ascending,
            SortOrder::Desc => ascending.reverse(),
        }
    }

    /// Applies filter, order and cap to an unordered set of records.
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut selected: Vec<Record> = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect();
        selected.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            selected.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        selected
    }
}

/// Full ordered result set of a query at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub collection: Collection,
    pub records: Vec<Record>,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Persists a new record, assigning its `id` and `seq`.
    async fn insert(&self, path: &CollectionPath, draft: RecordDraft) -> StoreResult<Record>;

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Record>;

    /// Applies a patch atomically with respect to other writes of the same record.
    async fn merge(
        &self,
        path: &CollectionPath,
        id: &str,
        patch: &RecordPatch,
    ) -> StoreResult<Record>;

    async fn remove(&self, path: &CollectionPath, id: &str) -> StoreResult<()>;

    async fn query(&self, path: &CollectionPath, query: &SnapshotQuery)
    -> StoreResult<Vec<Record>>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
