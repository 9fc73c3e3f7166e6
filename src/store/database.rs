//! SeaORM implementation of the tenant store.
//!
//! All collections share the `records` table. Every statement filters on both
//! `tenant_id` and `collection`, so a path can only ever reach its own rows.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet,
    Order, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{SnapshotQuery, SortOrder, StoreError, StoreResult, TenantStore};
use crate::models::record::{self, Entity as RecordEntity};
use crate::models::{CollectionPath, Record, RecordDraft, RecordPatch, RecordStatus};

#[derive(Debug, Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn scoped(path: &CollectionPath) -> Select<RecordEntity> {
    RecordEntity::find()
        .filter(record::Column::TenantId.eq(path.tenant().as_str()))
        .filter(record::Column::Collection.eq(path.collection().as_str()))
}

async fn find_row<C: ConnectionTrait>(
    conn: &C,
    path: &CollectionPath,
    id: &str,
) -> StoreResult<record::Model> {
    scoped(path)
        .filter(record::Column::Id.eq(id))
        .one(conn)
        .await?
        .ok_or_else(|| StoreError::not_found(path, id))
}

fn into_record(path: &CollectionPath, model: record::Model) -> Record {
    let fields = match model.fields {
        Value::Object(fields) => fields,
        other => {
            tracing::warn!(
                record_id = %model.id,
                path = %path,
                kind = ?other,
                "Stored record fields are not a JSON object, ignoring them"
            );
            Map::new()
        }
    };
    Record {
        status: RecordStatus::from_column(path.collection(), &model.status),
        id: model.id,
        created_at: model.created_at.with_timezone(&Utc),
        seq: model.seq,
        fields,
    }
}

#[async_trait]
impl TenantStore for DatabaseStore {
    async fn insert(&self, path: &CollectionPath, draft: RecordDraft) -> StoreResult<Record> {
        let row = record::ActiveModel {
            seq: NotSet,
            id: Set(Uuid::new_v4().to_string()),
            tenant_id: Set(path.tenant().as_str().to_string()),
            collection: Set(path.collection().as_str().to_string()),
            status: Set(draft.status.to_column()),
            fields: Set(Value::Object(draft.fields)),
            created_at: Set(draft.created_at.into()),
        };
        let model = row.insert(self.db.as_ref()).await?;
        Ok(into_record(path, model))
    }

    async fn get(&self, path: &CollectionPath, id: &str) -> StoreResult<Record> {
        let model = find_row(self.db.as_ref(), path, id).await?;
        Ok(into_record(path, model))
    }

    async fn merge(
        &self,
        path: &CollectionPath,
        id: &str,
        patch: &RecordPatch,
    ) -> StoreResult<Record> {
        let txn = self.db.begin().await?;
        let model = find_row(&txn, path, id).await?;

        let mut merged = into_record(path, model.clone());
        merged.apply_patch(patch);

        let mut row: record::ActiveModel = model.into();
        row.status = Set(merged.status.to_column());
        row.fields = Set(Value::Object(merged.fields));
        let updated = row.update(&txn).await?;
        txn.commit().await?;

        Ok(into_record(path, updated))
    }

    async fn remove(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        let result = RecordEntity::delete_many()
            .filter(record::Column::TenantId.eq(path.tenant().as_str()))
            .filter(record::Column::Collection.eq(path.collection().as_str()))
            .filter(record::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found(path, id));
        }
        Ok(())
    }

    async fn query(
        &self,
        path: &CollectionPath,
        query: &SnapshotQuery,
    ) -> StoreResult<Vec<Record>> {
        let order = match query.order {
            SortOrder::Asc => Order::Asc,
            SortOrder::Desc => Order::Desc,
        };
        let mut select = scoped(path);
        if let Some(status) = &query.status {
            select = select.filter(record::Column::Status.eq(status.as_str()));
        }
        let models = select
            .order_by(record::Column::CreatedAt, order.clone())
            .order_by(record::Column::Seq, order)
            .limit(query.limit)
            .all(self.db.as_ref())
            .await?;
        Ok(models
            .into_iter()
            .map(|model| into_record(path, model))
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::db::health_check(&self.db)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "database"
    }
}
