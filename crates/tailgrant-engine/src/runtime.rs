//! the workflow runtime: a registry of durable cooperative state machines.
//!
//! each instance executes logically single-threaded, one event at a time, on
//! its own tokio task. State between suspension points is checkpointed in
//! [`tailgrant_db`]; signals flow through the durable per-run queue and the
//! in-process mailbox only carries wakeups. On restart, [`Runtime::resume_all`]
//! re-spawns every running instance from its checkpoint, re-arming timers to
//! their originally scheduled absolute instants.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use tailgrant_db::{RunStatus, TailgrantDb, WorkflowStore};
use tailgrant_types::{AddGrantSignal, GrantAssets, GrantRequest, GrantState, GrantType, GrantTypeStore};

use crate::approval;
use crate::error::{EngineError, Result};
use crate::lifecycle;
use crate::reconcile;
use crate::resource::ResourceClient;
use crate::tag_manager::{self, DeviceTagManagerState};

/// workflow kind for grant lifecycles.
pub const KIND_GRANT: &str = "grant";
/// workflow kind for approval gates.
pub const KIND_APPROVAL: &str = "approval";
/// workflow kind for device tag managers.
pub const KIND_DEVICE_TAGS: &str = "device-tags";
/// workflow kind for the reconciler singleton.
pub const KIND_RECONCILIATION: &str = "reconciliation";

/// the reconciler's fixed workflow id.
pub const RECONCILIATION_RUN_ID: &str = "reconciliation";

/// signal names, part of the wire contract.
pub const SIGNAL_APPROVE: &str = "approve";
/// deny a pending grant.
pub const SIGNAL_DENY: &str = "deny";
/// revoke an active grant.
pub const SIGNAL_REVOKE: &str = "revoke";
/// extend an active grant.
pub const SIGNAL_EXTEND: &str = "extend";
/// register a grant's assets with a device tag manager.
pub const SIGNAL_ADD_GRANT: &str = "add-grant";
/// release a grant's assets from a device tag manager.
pub const SIGNAL_REMOVE_GRANT: &str = "remove-grant";
/// ask a device tag manager to resync.
pub const SIGNAL_SYNC: &str = "sync";

/// workflow id for a grant lifecycle.
pub fn grant_run_id(grant_id: &str) -> String {
    format!("grant-{grant_id}")
}

/// workflow id for an approval gate.
pub fn approval_run_id(grant_id: &str) -> String {
    format!("approval-{grant_id}")
}

/// workflow id for a device tag manager.
pub fn device_run_id(device_id: &str) -> String {
    format!("device-tags-{device_id}")
}

/// convert a std duration to a chrono delta, saturating instead of failing.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

struct InstanceHandle {
    nudge: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

struct RuntimeInner<C> {
    db: TailgrantDb,
    client: C,
    grant_types: GrantTypeStore,
    sweep_interval: Duration,
    instances: Mutex<HashMap<String, InstanceHandle>>,
    completions: broadcast::Sender<String>,
}

/// handle to the workflow runtime. Clones share the same registry.
pub struct Runtime<C> {
    inner: Arc<RuntimeInner<C>>,
}

impl<C> Clone for Runtime<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ResourceClient> Runtime<C> {
    /// create a runtime over a database, control-plane client, and grant
    /// type store.
    pub fn new(db: TailgrantDb, client: C, grant_types: GrantTypeStore, sweep_interval: Duration) -> Self {
        let (completions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RuntimeInner {
                db,
                client,
                grant_types,
                sweep_interval,
                instances: Mutex::new(HashMap::new()),
                completions,
            }),
        }
    }

    /// the substrate store.
    pub fn db(&self) -> &TailgrantDb {
        &self.inner.db
    }

    /// the control-plane client.
    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// the configured grant types.
    pub fn grant_types(&self) -> &GrantTypeStore {
        &self.inner.grant_types
    }

    /// seconds between reconciliation sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    // ─── Lifecycle entry points ──────────────────────────────────────────────

    /// start a grant lifecycle for a validated request.
    ///
    /// idempotent per grant id: a duplicate start finds the existing run and
    /// does nothing.
    pub async fn start_grant(&self, request: GrantRequest) -> Result<GrantState> {
        if self.inner.grant_types.get(&request.grant_type_name).is_none() {
            return Err(EngineError::UnknownGrantType(request.grant_type_name));
        }

        let run_id = grant_run_id(&request.id);
        let state = GrantState::new(request);
        let state_json = serde_json::to_string(&state)?;

        let mut instances = self.inner.instances.lock().await;
        self.inner
            .db
            .create_run_if_absent(&run_id, KIND_GRANT, &state_json)
            .await?;
        self.spawn_locked(&mut instances, run_id, KIND_GRANT);
        Ok(state)
    }

    /// launch the reconciler singleton if it is not already running.
    ///
    /// the input sets are computed from the configured grant types.
    pub async fn start_reconciler(&self) -> Result<()> {
        let input = reconcile::ReconcilerInput::from_store(&self.inner.grant_types);
        let state = reconcile::ReconcilerState::new(input);
        let state_json = serde_json::to_string(&state)?;

        let mut instances = self.inner.instances.lock().await;
        self.inner
            .db
            .ensure_running_run(RECONCILIATION_RUN_ID, KIND_RECONCILIATION, &state_json)
            .await?;
        self.spawn_locked(
            &mut instances,
            RECONCILIATION_RUN_ID.to_string(),
            KIND_RECONCILIATION,
        );
        Ok(())
    }

    /// re-spawn every running instance from its checkpoint. Called once at
    /// process startup, before accepting requests.
    pub async fn resume_all(&self) -> Result<usize> {
        let runs = self.inner.db.running_runs().await?;
        let mut instances = self.inner.instances.lock().await;
        let mut resumed = 0;
        for run in runs {
            let kind = run.kind.clone();
            self.spawn_locked(&mut instances, run.id, &kind);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "resumed running workflows");
        }
        Ok(resumed)
    }

    // ─── Signals ─────────────────────────────────────────────────────────────

    /// deliver a signal to a running instance.
    ///
    /// the signal is durably enqueued before the instance is woken; an
    /// instance that is mid-restart drains it from the queue instead.
    pub async fn signal<T: Serialize>(&self, run_id: &str, name: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        let instances = self.inner.instances.lock().await;

        let run = self
            .inner
            .db
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Running {
            return Err(EngineError::RunNotRunning(run_id.to_string()));
        }

        self.inner.db.enqueue_signal(run_id, name, &payload).await?;
        if let Some(handle) = instances.get(run_id) {
            let _ = handle.nudge.send(());
        }
        Ok(())
    }

    /// atomically create the device tag manager for a device if absent (or
    /// re-arm it if a previous generation exited), enqueue an add-grant
    /// signal, and wake it. Never check-then-create.
    pub async fn signal_with_start_device_manager(
        &self,
        device_id: &str,
        signal: &AddGrantSignal,
    ) -> Result<()> {
        let run_id = device_run_id(device_id);
        let initial = DeviceTagManagerState::new(device_id);
        let initial_json = serde_json::to_string(&initial)?;
        let payload = serde_json::to_string(signal)?;

        let mut instances = self.inner.instances.lock().await;
        self.inner
            .db
            .ensure_running_run(&run_id, KIND_DEVICE_TAGS, &initial_json)
            .await?;
        self.inner
            .db
            .enqueue_signal(&run_id, SIGNAL_ADD_GRANT, &payload)
            .await?;
        self.spawn_locked(&mut instances, run_id.clone(), KIND_DEVICE_TAGS);
        if let Some(handle) = instances.get(&run_id) {
            let _ = handle.nudge.send(());
        }
        Ok(())
    }

    /// complete a device tag manager run if and only if its signal queue is
    /// empty, serialized against concurrent signal-with-start. Returns
    /// `false` if a signal raced in and the manager must keep processing.
    pub(crate) async fn try_finish_device_manager(
        &self,
        run_id: &str,
        final_state: &str,
    ) -> Result<bool> {
        let mut instances = self.inner.instances.lock().await;
        if self.inner.db.pending_signal_count(run_id).await? > 0 {
            return Ok(false);
        }
        self.inner.db.complete_run(run_id, final_state, "null").await?;
        instances.remove(run_id);
        drop(instances);
        let _ = self.inner.completions.send(run_id.to_string());
        Ok(true)
    }

    // ─── Children and results ────────────────────────────────────────────────

    /// start an approval gate for a grant if one has never run. A finished
    /// gate keeps its result, so a lifecycle resuming after a crash reads
    /// the original decision instead of reopening the gate.
    pub(crate) async fn start_approval(
        &self,
        grant_id: &str,
        grant_type: &GrantType,
        requester: &str,
    ) -> Result<String> {
        let run_id = approval_run_id(grant_id);
        let state = approval::ApprovalState::new(grant_id, grant_type, requester);
        let state_json = serde_json::to_string(&state)?;

        let mut instances = self.inner.instances.lock().await;
        self.inner
            .db
            .create_run_if_absent(&run_id, KIND_APPROVAL, &state_json)
            .await?;
        self.spawn_locked(&mut instances, run_id.clone(), KIND_APPROVAL);
        Ok(run_id)
    }

    /// wait for a run to finish and return its result value.
    pub async fn await_result(&self, run_id: &str) -> Result<serde_json::Value> {
        // subscribe before the first check so a completion between the check
        // and the wait is not missed
        let mut completions = self.inner.completions.subscribe();
        loop {
            let run = self
                .inner
                .db
                .get_run(run_id)
                .await?
                .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
            match run.status {
                RunStatus::Completed => {
                    let result = run.result.unwrap_or_else(|| "null".to_string());
                    return Ok(serde_json::from_str(&result)?);
                }
                RunStatus::Failed => {
                    return Err(EngineError::RunFailed {
                        id: run_id.to_string(),
                        error: run.error.unwrap_or_default(),
                    });
                }
                RunStatus::Terminated => {
                    return Err(EngineError::RunFailed {
                        id: run_id.to_string(),
                        error: "terminated".to_string(),
                    });
                }
                RunStatus::Running => {}
            }

            loop {
                match completions.recv().await {
                    Ok(id) if id == run_id => break,
                    Ok(_) => continue,
                    // lagged: recheck the row rather than miss a completion
                    Err(_) => break,
                }
            }
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// whether a run exists and is in the running state. Absence is a
    /// `false`, never an error.
    pub async fn exists_running(&self, run_id: &str) -> Result<bool> {
        Ok(matches!(
            self.inner.db.get_run(run_id).await?,
            Some(run) if run.status == RunStatus::Running
        ))
    }

    /// snapshot of a grant lifecycle's queryable state.
    pub async fn grant_state(&self, grant_id: &str) -> Result<Option<GrantState>> {
        let run = self.inner.db.get_run(&grant_run_id(grant_id)).await?;
        match run {
            None => Ok(None),
            Some(run) => Ok(Some(serde_json::from_str(&run.state)?)),
        }
    }

    /// states of all grant lifecycles that ran to a queryable point
    /// (running or completed; failed and terminated runs are omitted).
    pub async fn list_grant_states(&self) -> Result<Vec<GrantState>> {
        let runs = self.inner.db.list_runs(KIND_GRANT).await?;
        let mut states = Vec::with_capacity(runs.len());
        for run in runs {
            if matches!(run.status, RunStatus::Running | RunStatus::Completed) {
                states.push(serde_json::from_str(&run.state)?);
            }
        }
        Ok(states)
    }

    /// the `active-grants` query against a device's tag manager. Returns
    /// `None` when no manager is running for the device.
    pub async fn device_manager_grants(
        &self,
        device_id: &str,
    ) -> Result<Option<BTreeMap<String, GrantAssets>>> {
        let run = self.inner.db.get_run(&device_run_id(device_id)).await?;
        match run {
            Some(run) if run.status == RunStatus::Running => {
                let state: DeviceTagManagerState = serde_json::from_str(&run.state)?;
                Ok(Some(state.active_grants))
            }
            _ => Ok(None),
        }
    }

    /// worker shutdown: stop every driver task without touching run rows.
    /// this is not a terminal cancel; a later [`Runtime::resume_all`]
    /// continues every instance from its checkpoint.
    pub async fn shutdown(&self) {
        let mut instances = self.inner.instances.lock().await;
        for (_, handle) in instances.drain() {
            handle.task.abort();
        }
    }

    // ─── Termination ─────────────────────────────────────────────────────────

    /// admin-initiated terminal cancellation. The instance is aborted
    /// immediately; its revert phase may not run, and the reconciler is the
    /// safety net for any tags or posture it leaves behind.
    pub async fn terminate(&self, run_id: &str) -> Result<()> {
        let mut instances = self.inner.instances.lock().await;
        if let Some(handle) = instances.remove(run_id) {
            handle.task.abort();
        }
        self.inner.db.terminate_run(run_id).await?;
        drop(instances);
        let _ = self.inner.completions.send(run_id.to_string());
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    /// spawn a driver task for a run unless a live one is registered.
    /// callers hold the registry lock.
    fn spawn_locked(
        &self,
        instances: &mut HashMap<String, InstanceHandle>,
        run_id: String,
        kind: &str,
    ) {
        if let Some(handle) = instances.get(&run_id)
            && !handle.nudge.is_closed()
        {
            return;
        }

        let (nudge_tx, nudge_rx) = mpsc::unbounded_channel();
        let rt = self.clone();
        let kind = kind.to_string();
        let id = run_id.clone();
        let task = tokio::spawn(async move {
            let result = match kind.as_str() {
                KIND_GRANT => lifecycle::run(rt.clone(), id.clone(), nudge_rx).await,
                KIND_APPROVAL => approval::run(rt.clone(), id.clone(), nudge_rx).await,
                KIND_DEVICE_TAGS => tag_manager::run(rt.clone(), id.clone(), nudge_rx).await,
                KIND_RECONCILIATION => reconcile::run(rt.clone(), id.clone(), nudge_rx).await,
                other => {
                    error!(run_id = %id, kind = other, "unknown workflow kind");
                    return;
                }
            };
            if let Err(err) = result {
                error!(run_id = %id, error = %err, "workflow failed");
                if let Err(db_err) = rt.inner.db.fail_run(&id, &err.to_string()).await {
                    error!(run_id = %id, error = %db_err, "failed to record workflow failure");
                }
            }
            rt.finish_instance(&id).await;
        });

        instances.insert(
            run_id,
            InstanceHandle {
                nudge: nudge_tx,
                task,
            },
        );
    }

    /// deregister a finished instance and wake result waiters. Only removes
    /// the registry entry if its mailbox is closed, so a newer generation
    /// registered under the same id survives.
    async fn finish_instance(&self, run_id: &str) {
        let mut instances = self.inner.instances.lock().await;
        if let Some(handle) = instances.get(run_id)
            && handle.nudge.is_closed()
        {
            instances.remove(run_id);
        }
        drop(instances);
        let _ = self.inner.completions.send(run_id.to_string());
    }
}
