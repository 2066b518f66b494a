//! durable storage for the tailgrant workflow substrate.
//!
//! this crate persists the two things the orchestration engine needs to
//! survive restarts:
//! - Workflow runs: one row per state-machine instance with its latest
//!   json state checkpoint and final result
//! - Workflow signals: an append-only per-run queue with consumed markers
//!
//! delivery is exactly-once because a signal's consumed marker and the run's
//! state checkpoint are written in a single transaction.

#![warn(missing_docs)]

mod entity;
mod error;
mod migration;

pub use error::Error;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database as SeaOrmDatabase, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;

use entity::{workflow_run, workflow_signal};
use tailgrant_types::DatabaseConfig;

/// result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// lifecycle status of a workflow run row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// the instance has work left to do; resumed on startup.
    Running,
    /// the instance finished and persisted a result.
    Completed,
    /// the instance stopped with an error.
    Failed,
    /// an operator terminated the instance; its revert phase may not have
    /// run.
    Terminated,
}

impl RunStatus {
    /// the status string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "terminated" => Ok(RunStatus::Terminated),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// a workflow run row.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    /// workflow id, e.g. `grant-<uuid>` or `device-tags-<deviceId>`.
    pub id: String,
    /// workflow kind (grant, approval, device-tags, reconciliation).
    pub kind: String,
    /// run status.
    pub status: RunStatus,
    /// latest json state checkpoint.
    pub state: String,
    /// json result, present once completed.
    pub result: Option<String>,
    /// error message, present once failed.
    pub error: Option<String>,
    /// row creation time.
    pub created_at: DateTime<Utc>,
    /// last checkpoint time.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<workflow_run::Model> for WorkflowRun {
    type Error = Error;

    fn try_from(m: workflow_run::Model) -> Result<Self> {
        Ok(Self {
            status: m.status.parse()?,
            id: m.id,
            kind: m.kind,
            state: m.state,
            result: m.result,
            error: m.error,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

/// a pending signal popped from a run's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignal {
    /// queue position; signals are delivered in id order.
    pub id: i64,
    /// signal name.
    pub name: String,
    /// json payload.
    pub payload: String,
}

/// storage operations the workflow runtime needs.
///
/// this trait abstracts over database backends (sqlite, postgresql); the
/// engine calls it through [`TailgrantDb`].
pub trait WorkflowStore: Send + Sync {
    /// ping the database to verify connectivity.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    // ─── Run Operations ──────────────────────────────────────────────────────

    /// insert a running run row for `id` if no row exists at all.
    ///
    /// returns `true` if this call created the row. A row in any terminal
    /// status is left untouched, so a finished run can never be restarted
    /// under the same id.
    fn create_run_if_absent(
        &self,
        id: &str,
        kind: &str,
        initial_state: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// ensure a running run row exists for `id`.
    ///
    /// inserts the row if absent; re-arms it with `initial_state` if a
    /// previous generation finished. Returns `true` if this call created or
    /// re-armed the row, `false` if a running row already existed. This is
    /// the CAS half of signal-with-start for regenerating workflows
    /// (device tag managers, the reconciler).
    fn ensure_running_run(
        &self,
        id: &str,
        kind: &str,
        initial_state: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// get a run by workflow id.
    fn get_run(&self, id: &str) -> impl Future<Output = Result<Option<WorkflowRun>>> + Send;

    /// list all runs of a kind, any status.
    fn list_runs(&self, kind: &str) -> impl Future<Output = Result<Vec<WorkflowRun>>> + Send;

    /// list all running runs, any kind. Used to resume after restart.
    fn running_runs(&self) -> impl Future<Output = Result<Vec<WorkflowRun>>> + Send;

    /// overwrite a run's state checkpoint.
    fn checkpoint(&self, id: &str, state: &str) -> impl Future<Output = Result<()>> + Send;

    /// mark a run completed with its final state and result.
    fn complete_run(
        &self,
        id: &str,
        state: &str,
        result: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// mark a run failed.
    fn fail_run(&self, id: &str, error: &str) -> impl Future<Output = Result<()>> + Send;

    /// mark a run terminated (admin-initiated; no revert guarantee).
    fn terminate_run(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    // ─── Signal Operations ───────────────────────────────────────────────────

    /// append a signal to a run's queue. Returns the queue position.
    fn enqueue_signal(
        &self,
        workflow_id: &str,
        name: &str,
        payload: &str,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// the oldest unconsumed signal for a run, if any.
    fn next_pending_signal(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<Option<PendingSignal>>> + Send;

    /// number of unconsumed signals for a run.
    fn pending_signal_count(&self, workflow_id: &str)
    -> impl Future<Output = Result<u64>> + Send;

    /// atomically mark a signal consumed and write the run's next state
    /// checkpoint. This single transaction is the exactly-once guarantee.
    fn consume_signal(
        &self,
        workflow_id: &str,
        signal_id: i64,
        state: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// atomically mark a run completed and consume the signal that decided
    /// it, so a crash can neither lose the decision nor redeliver it.
    fn consume_signal_and_complete(
        &self,
        workflow_id: &str,
        signal_id: i64,
        state: &str,
        result: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// delete a run's consumed signals (continue-as-new compaction).
    /// returns the number of rows deleted.
    fn prune_consumed_signals(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// database handle for tailgrant.
#[derive(Clone)]
pub struct TailgrantDb {
    conn: DatabaseConnection,
}

impl TailgrantDb {
    /// connect using the database section of the config.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = match config.db_type.as_str() {
            "sqlite" => format!("sqlite://{}?mode=rwc", config.connection_string),
            "postgres" => config.connection_string.clone(),
            other => return Err(Error::UnsupportedDbType(other.to_string())),
        };
        let conn = SeaOrmDatabase::connect(&url).await?;
        Ok(Self { conn })
    }

    /// connect to an in-memory sqlite database (tests).
    pub async fn new_in_memory() -> Result<Self> {
        let conn = SeaOrmDatabase::connect("sqlite::memory:").await?;
        let db = Self { conn };
        db.migrate().await?;
        Ok(db)
    }

    /// run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        migration::Migrator::up(&self.conn, None).await?;
        Ok(())
    }
}

impl WorkflowStore for TailgrantDb {
    async fn ping(&self) -> Result<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn create_run_if_absent(&self, id: &str, kind: &str, initial_state: &str) -> Result<bool> {
        let txn = self.conn.begin().await?;

        let existing = workflow_run::Entity::find_by_id(id).one(&txn).await?;
        let created = if existing.is_none() {
            let now = Utc::now();
            workflow_run::ActiveModel {
                id: Set(id.to_string()),
                kind: Set(kind.to_string()),
                status: Set(RunStatus::Running.as_str().to_string()),
                state: Set(initial_state.to_string()),
                result: Set(None),
                error: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            true
        } else {
            false
        };

        txn.commit().await?;
        Ok(created)
    }

    async fn ensure_running_run(&self, id: &str, kind: &str, initial_state: &str) -> Result<bool> {
        let txn = self.conn.begin().await?;

        let existing = workflow_run::Entity::find_by_id(id).one(&txn).await?;
        let now = Utc::now();

        let created = match existing {
            None => {
                workflow_run::ActiveModel {
                    id: Set(id.to_string()),
                    kind: Set(kind.to_string()),
                    status: Set(RunStatus::Running.as_str().to_string()),
                    state: Set(initial_state.to_string()),
                    result: Set(None),
                    error: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                true
            }
            Some(run) if run.status != RunStatus::Running.as_str() => {
                let mut active: workflow_run::ActiveModel = run.into();
                active.status = Set(RunStatus::Running.as_str().to_string());
                active.state = Set(initial_state.to_string());
                active.result = Set(None);
                active.error = Set(None);
                active.updated_at = Set(now);
                active.update(&txn).await?;
                true
            }
            Some(_) => false,
        };

        txn.commit().await?;
        Ok(created)
    }

    async fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>> {
        workflow_run::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .map(WorkflowRun::try_from)
            .transpose()
    }

    async fn list_runs(&self, kind: &str) -> Result<Vec<WorkflowRun>> {
        workflow_run::Entity::find()
            .filter(workflow_run::Column::Kind.eq(kind))
            .order_by_asc(workflow_run::Column::CreatedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(WorkflowRun::try_from)
            .collect()
    }

    async fn running_runs(&self) -> Result<Vec<WorkflowRun>> {
        workflow_run::Entity::find()
            .filter(workflow_run::Column::Status.eq(RunStatus::Running.as_str()))
            .order_by_asc(workflow_run::Column::CreatedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(WorkflowRun::try_from)
            .collect()
    }

    async fn checkpoint(&self, id: &str, state: &str) -> Result<()> {
        let run = workflow_run::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;

        let mut active: workflow_run::ActiveModel = run.into();
        active.state = Set(state.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        Ok(())
    }

    async fn complete_run(&self, id: &str, state: &str, result: &str) -> Result<()> {
        let run = workflow_run::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;

        let mut active: workflow_run::ActiveModel = run.into();
        active.status = Set(RunStatus::Completed.as_str().to_string());
        active.state = Set(state.to_string());
        active.result = Set(Some(result.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        Ok(())
    }

    async fn fail_run(&self, id: &str, error: &str) -> Result<()> {
        let run = workflow_run::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;

        let mut active: workflow_run::ActiveModel = run.into();
        active.status = Set(RunStatus::Failed.as_str().to_string());
        active.error = Set(Some(error.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        Ok(())
    }

    async fn terminate_run(&self, id: &str) -> Result<()> {
        let run = workflow_run::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;

        let mut active: workflow_run::ActiveModel = run.into();
        active.status = Set(RunStatus::Terminated.as_str().to_string());
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;
        Ok(())
    }

    async fn enqueue_signal(&self, workflow_id: &str, name: &str, payload: &str) -> Result<i64> {
        let signal = workflow_signal::ActiveModel {
            workflow_id: Set(workflow_id.to_string()),
            name: Set(name.to_string()),
            payload: Set(payload.to_string()),
            enqueued_at: Set(Utc::now()),
            consumed_at: Set(None),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(signal.id)
    }

    async fn next_pending_signal(&self, workflow_id: &str) -> Result<Option<PendingSignal>> {
        let signal = workflow_signal::Entity::find()
            .filter(workflow_signal::Column::WorkflowId.eq(workflow_id))
            .filter(workflow_signal::Column::ConsumedAt.is_null())
            .order_by_asc(workflow_signal::Column::Id)
            .one(&self.conn)
            .await?;

        Ok(signal.map(|s| PendingSignal {
            id: s.id,
            name: s.name,
            payload: s.payload,
        }))
    }

    async fn pending_signal_count(&self, workflow_id: &str) -> Result<u64> {
        let count = workflow_signal::Entity::find()
            .filter(workflow_signal::Column::WorkflowId.eq(workflow_id))
            .filter(workflow_signal::Column::ConsumedAt.is_null())
            .count(&self.conn)
            .await?;
        Ok(count)
    }

    async fn consume_signal(&self, workflow_id: &str, signal_id: i64, state: &str) -> Result<()> {
        let txn = self.conn.begin().await?;

        if let Some(signal) = workflow_signal::Entity::find_by_id(signal_id).one(&txn).await? {
            let mut active: workflow_signal::ActiveModel = signal.into();
            active.consumed_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }

        let run = workflow_run::Entity::find_by_id(workflow_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::RunNotFound(workflow_id.to_string()))?;
        let mut active: workflow_run::ActiveModel = run.into();
        active.state = Set(state.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn consume_signal_and_complete(
        &self,
        workflow_id: &str,
        signal_id: i64,
        state: &str,
        result: &str,
    ) -> Result<()> {
        let txn = self.conn.begin().await?;

        if let Some(signal) = workflow_signal::Entity::find_by_id(signal_id).one(&txn).await? {
            let mut active: workflow_signal::ActiveModel = signal.into();
            active.consumed_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }

        let run = workflow_run::Entity::find_by_id(workflow_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::RunNotFound(workflow_id.to_string()))?;
        let mut active: workflow_run::ActiveModel = run.into();
        active.status = Set(RunStatus::Completed.as_str().to_string());
        active.state = Set(state.to_string());
        active.result = Set(Some(result.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn prune_consumed_signals(&self, workflow_id: &str) -> Result<u64> {
        let res = workflow_signal::Entity::delete_many()
            .filter(workflow_signal::Column::WorkflowId.eq(workflow_id))
            .filter(workflow_signal::Column::ConsumedAt.is_not_null())
            .exec(&self.conn)
            .await?;
        Ok(res.rows_affected)
    }
}
