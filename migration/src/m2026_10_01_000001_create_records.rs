//! Migration to create the records table.
//!
//! Every tenant collection (`patients`, `funnel`, `webhook_logs`) lives in this one table,
//! addressed by `(tenant_id, collection)`. `seq` is the insertion sequence and breaks
//! ordering ties between records sharing a `created_at`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Records::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Records::Seq)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Records::Id).text().not_null().unique_key())
                    .col(ColumnDef::new(Records::TenantId).text().not_null())
                    .col(ColumnDef::new(Records::Collection).text().not_null())
                    .col(ColumnDef::new(Records::Status).text().not_null())
                    .col(ColumnDef::new(Records::Fields).json_binary().not_null())
                    .col(
                        ColumnDef::new(Records::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Snapshot queries always filter by tenant and collection, then order by created_at.
        manager
            .create_index(
                Index::create()
                    .name("idx_records_tenant_collection_created")
                    .table(Records::Table)
                    .col(Records::TenantId)
                    .col(Records::Collection)
                    .col(Records::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_records_tenant_collection_created")
                    .table(Records::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Records::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Records {
    Table,
    Seq,
    Id,
    TenantId,
    Collection,
    Status,
    Fields,
    CreatedAt,
}
