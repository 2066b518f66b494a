//! workflow signal entity: an append-only per-run signal queue.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// workflow signal database model.
///
/// the auto-increment id is the arrival order; signals for one run are
/// always delivered in id order. `consumed_at` is set in the same
/// transaction as the run's state checkpoint, which is what makes delivery
/// exactly-once.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_signals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// the run this signal is addressed to.
    pub workflow_id: String,

    /// signal name (add-grant, remove-grant, sync, approve, deny, revoke,
    /// extend).
    pub name: String,

    /// json-serialized payload.
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    pub enqueued_at: DateTime<Utc>,

    /// when the signal was processed; null while pending.
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
