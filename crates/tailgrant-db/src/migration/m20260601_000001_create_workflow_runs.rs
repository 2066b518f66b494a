//! create workflow_runs table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRuns::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::Kind).string().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Status).string().not_null())
                    .col(ColumnDef::new(WorkflowRuns::State).text().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Result).text())
                    .col(ColumnDef::new(WorkflowRuns::Error).string())
                    .col(
                        ColumnDef::new(WorkflowRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // index for resuming all running workflows of a kind at startup
        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_kind_status")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::Kind)
                    .col(WorkflowRuns::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum WorkflowRuns {
    #[sea_orm(iden = "workflow_runs")]
    Table,
    Id,
    Kind,
    Status,
    State,
    Result,
    Error,
    CreatedAt,
    UpdatedAt,
}
