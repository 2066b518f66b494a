//! workflow run entity: one row per state-machine instance.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// workflow run database model.
///
/// `state` holds the instance's latest json checkpoint; `result` holds the
/// final json value once the run completes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_runs")]
pub struct Model {
    /// workflow id, e.g. `grant-<uuid>` or `device-tags-<deviceId>`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// workflow kind (grant, approval, device-tags, reconciliation).
    pub kind: String,

    /// run status: running, completed, failed, terminated.
    pub status: String,

    /// json-serialized state checkpoint.
    #[sea_orm(column_type = "Text")]
    pub state: String,

    /// json-serialized result, set on completion.
    #[sea_orm(column_type = "Text", nullable)]
    pub result: Option<String>,

    /// error message, set on failure.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
