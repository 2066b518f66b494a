//! create workflow_signals table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowSignals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowSignals::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowSignals::WorkflowId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowSignals::Name).string().not_null())
                    .col(ColumnDef::new(WorkflowSignals::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WorkflowSignals::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowSignals::ConsumedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // index for draining a run's pending signals in arrival order
        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_signals_workflow_id_consumed_at")
                    .table(WorkflowSignals::Table)
                    .col(WorkflowSignals::WorkflowId)
                    .col(WorkflowSignals::ConsumedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowSignals::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum WorkflowSignals {
    #[sea_orm(iden = "workflow_signals")]
    Table,
    Id,
    WorkflowId,
    Name,
    Payload,
    EnqueuedAt,
    ConsumedAt,
}
