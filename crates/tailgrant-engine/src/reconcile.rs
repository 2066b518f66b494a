//! the reconciler: a periodic sweep that strips stale grant-managed state
//! and corrects drift.
//!
//! the sweep only ever touches tags and posture keys the config declared as
//! grant-managed, so externally-administered state is invisible to it by
//! construction. A device with grant-managed state but no live tag manager
//! is stale (the lifecycle crashed or its removal signal was lost); a device
//! with a live manager whose observed state disagrees with the manager's
//! active grants has drifted and is told to resync.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tailgrant_db::{RunStatus, WorkflowStore};
use tailgrant_types::{GrantTypeStore, PostureTarget, SyncSignal};

use crate::error::Result;
use crate::resource::ResourceClient;
use crate::retry::{self, RetryPolicy};
use crate::runtime::{Runtime, SIGNAL_SYNC, device_run_id, to_chrono};

/// the global grant-managed sets, computed from config at startup.
///
/// posture reconciliation only covers target-device-scoped attributes.
/// Requester-scoped attributes live on the requester's device, which this
/// per-device loop cannot associate back to a tag manager; the tag manager
/// lifecycle owns their removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerInput {
    /// every tag any grant type may assign.
    pub grant_tags: BTreeSet<String>,
    /// every posture key any grant type may set.
    pub grant_posture_keys: BTreeSet<String>,
}

impl ReconcilerInput {
    /// compute the input sets from the configured grant types.
    pub fn from_store(store: &GrantTypeStore) -> Self {
        Self {
            grant_tags: store.grant_tags().iter().map(|t| t.to_string()).collect(),
            grant_posture_keys: store
                .grant_posture_keys()
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

/// checkpointed state of the reconciler singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReconcilerState {
    pub input: ReconcilerInput,
    /// absolute instant of the next sweep; re-armed across restarts.
    pub next_sweep_at: Option<DateTime<Utc>>,
}

impl ReconcilerState {
    pub fn new(input: ReconcilerInput) -> Self {
        Self {
            input,
            next_sweep_at: None,
        }
    }
}

/// counters from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// devices examined.
    pub devices_seen: usize,
    /// devices whose stale grant-managed state was stripped.
    pub stale_cleaned: usize,
    /// live managers sent a sync for drift.
    pub drift_synced: usize,
}

/// drive the reconciler singleton: sweep, sleep, repeat.
pub(crate) async fn run<C: ResourceClient>(
    rt: Runtime<C>,
    run_id: String,
    mut nudges: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let Some(run) = rt.db().get_run(&run_id).await? else {
        return Ok(());
    };
    if run.status != RunStatus::Running {
        return Ok(());
    }
    let mut state: ReconcilerState = serde_json::from_str(&run.state)?;
    info!("reconciler started");

    loop {
        if let Some(next) = state.next_sweep_at {
            let remaining = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                msg = nudges.recv() => {
                    if msg.is_none() {
                        return Ok(());
                    }
                    continue;
                }
            }
        }

        let stats = sweep(&rt, &state.input).await;
        info!(
            devices = stats.devices_seen,
            stale_cleaned = stats.stale_cleaned,
            drift_synced = stats.drift_synced,
            "reconciliation sweep complete"
        );

        state.next_sweep_at = Some(Utc::now() + to_chrono(rt.sweep_interval()));
        // continue-as-new: the sweep carries no signal history, so the
        // checkpoint is the entire restart state
        rt.db()
            .checkpoint(&run_id, &serde_json::to_string(&state)?)
            .await?;
    }
}

/// one pass over the device list. Failures are logged per device; a sweep
/// never aborts the reconciler.
pub async fn sweep<C: ResourceClient>(rt: &Runtime<C>, input: &ReconcilerInput) -> SweepStats {
    let mut stats = SweepStats::default();

    let devices = match retry::api("list devices", || rt.client().list_devices()).await {
        Ok(devices) => devices,
        Err(err) => {
            error!(error = %err, "failed to list devices, skipping sweep");
            return stats;
        }
    };

    for device in devices {
        stats.devices_seen += 1;

        let (grant_tags, other_tags) = partition_tags(&device.tags, &input.grant_tags);

        // grant-managed posture keys currently present on this device
        let mut present_posture_keys = Vec::new();
        if !input.grant_posture_keys.is_empty() {
            match retry::api("get posture attributes", || {
                rt.client().get_posture_attributes(&device.id)
            })
            .await
            {
                Ok(attrs) => {
                    for key in attrs.keys() {
                        if input.grant_posture_keys.contains(key) {
                            present_posture_keys.push(key.clone());
                        }
                    }
                }
                Err(err) => {
                    warn!(device_id = %device.id, error = %err, "failed to get posture attributes");
                }
            }
        }

        if grant_tags.is_empty() && present_posture_keys.is_empty() {
            continue;
        }

        let manager_id = device_run_id(&device.id);
        let exists = match rt.exists_running(&manager_id).await {
            Ok(exists) => exists,
            Err(err) => {
                error!(device_id = %device.id, error = %err, "failed to check tag manager");
                continue;
            }
        };

        if !exists {
            // re-probe once: the first grant for this device may be mid
            // signal-with-start
            let exists_now = rt.exists_running(&manager_id).await.unwrap_or(false);
            if exists_now {
                info!(device_id = %device.id, "tag manager appeared on re-check, skipping cleanup");
                continue;
            }

            if !grant_tags.is_empty() {
                info!(device_id = %device.id, stale = ?grant_tags, "removing stale grant tags");
                if let Err(err) = retry::with_retries(
                    "set device tags",
                    RetryPolicy::default().with_max_attempts(3),
                    || rt.client().set_device_tags(&device.id, &other_tags),
                )
                .await
                {
                    error!(device_id = %device.id, error = %err, "failed to remove stale tags");
                }
            }
            for key in &present_posture_keys {
                info!(device_id = %device.id, key = %key, "removing stale posture attribute");
                if let Err(err) = retry::with_retries(
                    "delete posture attribute",
                    RetryPolicy::default().with_max_attempts(3),
                    || rt.client().delete_posture_attribute(&device.id, key),
                )
                .await
                {
                    error!(device_id = %device.id, key = %key, error = %err, "failed to remove stale posture attribute");
                }
            }
            stats.stale_cleaned += 1;
            continue;
        }

        // live manager: compare observed grant-managed state against its
        // active grants
        let sync = SyncSignal {
            grant_tags: input.grant_tags.clone(),
        };
        let active = match rt.device_manager_grants(&device.id).await {
            Ok(Some(grants)) => grants,
            Ok(None) | Err(_) => {
                warn!(device_id = %device.id, "failed to query tag manager, triggering sync");
                let _ = rt.signal(&manager_id, SIGNAL_SYNC, &sync).await;
                stats.drift_synced += 1;
                continue;
            }
        };

        let expected_tags: BTreeSet<String> = active
            .values()
            .flat_map(|assets| assets.tags.iter().map(|t| t.to_string()))
            .collect();
        let observed_tags: BTreeSet<String> = grant_tags.iter().cloned().collect();
        let tag_drift = !grant_tags.is_empty() && observed_tags != expected_tags;

        let expected_posture: BTreeSet<String> = active
            .values()
            .flat_map(|assets| {
                assets
                    .posture_attributes
                    .iter()
                    .filter(|pa| pa.target == PostureTarget::Target)
                    .map(|pa| pa.key.to_string())
            })
            .collect();
        let posture_drift = present_posture_keys
            .iter()
            .any(|key| !expected_posture.contains(key));

        if tag_drift || posture_drift {
            info!(
                device_id = %device.id,
                tag_drift,
                posture_drift,
                "drift detected, triggering sync"
            );
            if let Err(err) = rt.signal(&manager_id, SIGNAL_SYNC, &sync).await {
                // the manager may have completed between probe and signal;
                // the next sweep will treat its leftovers as stale
                warn!(device_id = %device.id, error = %err, "failed to signal sync");
            }
            stats.drift_synced += 1;
        }
    }

    stats
}

/// split a device's tags into grant-managed and everything else.
pub(crate) fn partition_tags(
    tags: &[String],
    grant_tags: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut managed = Vec::new();
    let mut other = Vec::new();
    for tag in tags {
        if grant_tags.contains(tag) {
            managed.push(tag.clone());
        } else {
            other.push(tag.clone());
        }
    }
    (managed, other)
}
