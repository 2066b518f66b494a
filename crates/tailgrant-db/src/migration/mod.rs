//! database migrations for tailgrant.

pub use sea_orm_migration::prelude::*;

mod m20260601_000001_create_workflow_runs;
mod m20260601_000002_create_workflow_signals;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260601_000001_create_workflow_runs::Migration),
            Box::new(m20260601_000002_create_workflow_signals::Migration),
        ]
    }
}
