//! the device tag manager: one instance per device, serializing every tag
//! and posture-attribute mutation on it.
//!
//! the manager processes add-grant, remove-grant, and sync signals strictly
//! in arrival order. Each mutation fetches the device's current tags and
//! writes back the union of surviving tags and all active grant tags, so
//! externally-set tags and tags shared between grants survive any removal
//! order. The fetch-then-set is race-free because this instance is the only
//! writer for its device.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tailgrant_db::{RunStatus, WorkflowStore};
use tailgrant_types::{
    AddGrantSignal, GrantAssets, PostureAttribute, PostureTarget, RemoveGrantSignal, SyncSignal,
};

use crate::error::Result;
use crate::resource::ResourceClient;
use crate::retry;
use crate::runtime::{Runtime, SIGNAL_ADD_GRANT, SIGNAL_REMOVE_GRANT, SIGNAL_SYNC};

/// signals processed before the manager compacts its persisted history.
pub const CONTINUE_AS_NEW_THRESHOLD: u32 = 1000;

/// checkpointed state of a device tag manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTagManagerState {
    /// the device this manager owns writes for.
    pub device_id: String,
    /// active grants on the device, keyed by grant id.
    pub active_grants: BTreeMap<String, GrantAssets>,
    /// signals processed since the last compaction.
    #[serde(default)]
    pub signals_processed: u32,
}

impl DeviceTagManagerState {
    /// fresh state for a device with no grants yet.
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            active_grants: BTreeMap::new(),
            signals_processed: 0,
        }
    }
}

/// drive one device tag manager until its last grant is removed.
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
    let mut state: DeviceTagManagerState = serde_json::from_str(&run.state)?;
    info!(device_id = %state.device_id, "device tag manager started");

    loop {
        while let Some(sig) = rt.db().next_pending_signal(&run_id).await? {
            handle_signal(&rt, &mut state, &sig.name, &sig.payload).await;

            state.signals_processed += 1;
            rt.db()
                .consume_signal(&run_id, sig.id, &serde_json::to_string(&state)?)
                .await?;

            if state.signals_processed >= CONTINUE_AS_NEW_THRESHOLD {
                let pruned = rt.db().prune_consumed_signals(&run_id).await?;
                state.signals_processed = 0;
                rt.db()
                    .checkpoint(&run_id, &serde_json::to_string(&state)?)
                    .await?;
                info!(
                    device_id = %state.device_id,
                    pruned,
                    "compacted tag manager history"
                );
            }
        }

        if state.active_grants.is_empty() {
            // exit is gated on an empty queue, checked under the registry
            // lock so it cannot race a signal-with-start
            if rt
                .try_finish_device_manager(&run_id, &serde_json::to_string(&state)?)
                .await?
            {
                info!(device_id = %state.device_id, "no active grants remaining, completing");
                return Ok(());
            }
            continue;
        }

        match nudges.recv().await {
            Some(()) => {}
            None => return Ok(()),
        }
    }
}

async fn handle_signal<C: ResourceClient>(
    rt: &Runtime<C>,
    state: &mut DeviceTagManagerState,
    name: &str,
    payload: &str,
) {
    let device_id = state.device_id.clone();
    match name {
        SIGNAL_ADD_GRANT => {
            let sig: AddGrantSignal = match serde_json::from_str(payload) {
                Ok(s) => s,
                Err(err) => {
                    warn!(device_id = %device_id, error = %err, "malformed add-grant signal");
                    return;
                }
            };
            let assets = GrantAssets {
                tags: sig.tags,
                posture_attributes: sig.posture_attributes,
                requester_device_id: sig.requester_device_id,
            };
            // an already-present grant id is a replace
            state.active_grants.insert(sig.grant_id.clone(), assets.clone());

            if let Err(err) = apply_tags(rt, state, &BTreeSet::new()).await {
                error!(device_id = %device_id, grant_id = %sig.grant_id, error = %err, "failed to apply tags after add");
            }
            if let Err(err) = apply_posture_attributes(
                rt,
                &device_id,
                &assets.posture_attributes,
                &assets.requester_device_id,
            )
            .await
            {
                error!(device_id = %device_id, grant_id = %sig.grant_id, error = %err, "failed to set posture attributes after add");
            }
        }
        SIGNAL_REMOVE_GRANT => {
            let sig: RemoveGrantSignal = match serde_json::from_str(payload) {
                Ok(s) => s,
                Err(err) => {
                    warn!(device_id = %device_id, error = %err, "malformed remove-grant signal");
                    return;
                }
            };
            // absent id means the removal was already processed; no-op
            let Some(assets) = state.active_grants.remove(&sig.grant_id) else {
                info!(device_id = %device_id, grant_id = %sig.grant_id, "remove for unknown grant, ignoring");
                return;
            };

            let removed: BTreeSet<String> = assets.tags.iter().map(|t| t.to_string()).collect();
            if let Err(err) = apply_tags(rt, state, &removed).await {
                error!(device_id = %device_id, grant_id = %sig.grant_id, error = %err, "failed to apply tags after remove");
            }
            // only delete posture attributes no remaining grant claims
            let orphaned =
                orphaned_posture_attributes(&assets, &state.active_grants, &device_id);
            if let Err(err) = remove_posture_attributes(
                rt,
                &device_id,
                &orphaned,
                &assets.requester_device_id,
            )
            .await
            {
                error!(device_id = %device_id, grant_id = %sig.grant_id, error = %err, "failed to delete posture attributes after remove");
            }
        }
        SIGNAL_SYNC => {
            let sig: SyncSignal = serde_json::from_str(payload).unwrap_or_default();
            // grant-manageable tags no active grant claims are stale and
            // stripped; external tags are untouched
            let claimed: BTreeSet<String> = state
                .active_grants
                .values()
                .flat_map(|a| a.tags.iter().map(|t| t.to_string()))
                .collect();
            let stale: BTreeSet<String> =
                sig.grant_tags.difference(&claimed).cloned().collect();

            if let Err(err) = apply_tags(rt, state, &stale).await {
                error!(device_id = %device_id, error = %err, "failed to apply tags after sync");
            }
            if let Err(err) = sync_posture_attributes(rt, state).await {
                error!(device_id = %device_id, error = %err, "failed to sync posture attributes");
            }
            info!(device_id = %device_id, "tags and posture attributes resynced");
        }
        other => {
            warn!(device_id = %device_id, signal = other, "unexpected signal for tag manager");
        }
    }
}

/// fetch current device tags, strip `removed` (tags from a just-removed
/// grant or stale grant-managed tags during sync), merge in all active
/// grant tags, and write the result back.
async fn apply_tags<C: ResourceClient>(
    rt: &Runtime<C>,
    state: &DeviceTagManagerState,
    removed: &BTreeSet<String>,
) -> Result<()> {
    let has_grant_tags = state.active_grants.values().any(|a| !a.tags.is_empty());
    if !has_grant_tags && removed.is_empty() {
        return Ok(());
    }

    let device_id = &state.device_id;
    let current = retry::api("get device tags", || rt.client().get_device_tags(device_id)).await?;
    let desired = compute_desired_tags(&current, &state.active_grants, removed);
    retry::api("set device tags", || {
        rt.client().set_device_tags(device_id, &desired)
    })
    .await?;
    Ok(())
}

/// the tag-union kernel.
///
/// externally-set tags survive because they are never in `removed` (which
/// only holds grant-managed tags); tags shared between grants survive
/// because every active grant re-adds its own tags after the strip.
pub fn compute_desired_tags(
    current: &[String],
    active_grants: &BTreeMap<String, GrantAssets>,
    removed: &BTreeSet<String>,
) -> Vec<String> {
    let mut desired: BTreeSet<String> = current
        .iter()
        .filter(|t| !removed.contains(t.as_str()))
        .cloned()
        .collect();
    for assets in active_grants.values() {
        desired.extend(assets.tags.iter().map(|t| t.to_string()));
    }

    desired.into_iter().collect()
}

/// which device a posture attribute lands on. `None` when the scoped device
/// id is unknown (e.g. a requester-scoped attribute with no requester
/// device).
pub fn resolve_posture_device<'a>(
    target_device: &'a str,
    attribute: &PostureAttribute,
    requester_device: &'a str,
) -> Option<&'a str> {
    let device = match attribute.target {
        PostureTarget::Target => target_device,
        PostureTarget::Requester => requester_device,
    };
    if device.is_empty() { None } else { Some(device) }
}

/// posture attributes of a removed grant whose `(device, key)` pair is not
/// claimed by any remaining active grant. Shared pairs are preserved, which
/// mirrors how the tag union preserves shared tags.
pub fn orphaned_posture_attributes(
    removed: &GrantAssets,
    active_grants: &BTreeMap<String, GrantAssets>,
    target_device: &str,
) -> Vec<PostureAttribute> {
    let claimed: BTreeSet<(String, String)> = active_grants
        .values()
        .flat_map(|assets| {
            assets.posture_attributes.iter().filter_map(|pa| {
                resolve_posture_device(target_device, pa, &assets.requester_device_id)
                    .map(|device| (device.to_string(), pa.key.to_string()))
            })
        })
        .collect();

    removed
        .posture_attributes
        .iter()
        .filter(|pa| {
            match resolve_posture_device(target_device, pa, &removed.requester_device_id) {
                Some(device) => !claimed.contains(&(device.to_string(), pa.key.to_string())),
                None => false,
            }
        })
        .cloned()
        .collect()
}

async fn apply_posture_attributes<C: ResourceClient>(
    rt: &Runtime<C>,
    target_device: &str,
    attributes: &[PostureAttribute],
    requester_device: &str,
) -> Result<()> {
    for pa in attributes {
        let Some(device_id) = resolve_posture_device(target_device, pa, requester_device) else {
            warn!(key = %pa.key, "skipping posture attribute: no device for target scope");
            continue;
        };
        retry::api("set posture attribute", || {
            rt.client()
                .set_posture_attribute(device_id, pa.key.as_str(), &pa.value)
        })
        .await?;
    }
    Ok(())
}

async fn remove_posture_attributes<C: ResourceClient>(
    rt: &Runtime<C>,
    target_device: &str,
    attributes: &[PostureAttribute],
    requester_device: &str,
) -> Result<()> {
    for pa in attributes {
        let Some(device_id) = resolve_posture_device(target_device, pa, requester_device) else {
            warn!(key = %pa.key, "skipping posture attribute removal: no device for target scope");
            continue;
        };
        retry::api("delete posture attribute", || {
            rt.client().delete_posture_attribute(device_id, pa.key.as_str())
        })
        .await?;
    }
    Ok(())
}

/// re-apply every expected posture attribute, then prune grant-managed keys
/// on the target device that no active grant expects. Requester-scoped
/// attributes are re-applied but not diffed: the reconciler only observes
/// the target device, and the grant lifecycle owns their removal.
async fn sync_posture_attributes<C: ResourceClient>(
    rt: &Runtime<C>,
    state: &DeviceTagManagerState,
) -> Result<()> {
    let expected: BTreeSet<(String, String)> = state
        .active_grants
        .values()
        .flat_map(|assets| {
            assets.posture_attributes.iter().filter_map(|pa| {
                resolve_posture_device(&state.device_id, pa, &assets.requester_device_id)
                    .map(|device| (device.to_string(), pa.key.to_string()))
            })
        })
        .collect();

    for assets in state.active_grants.values() {
        apply_posture_attributes(
            rt,
            &state.device_id,
            &assets.posture_attributes,
            &assets.requester_device_id,
        )
        .await?;
    }

    let current = match retry::api("get posture attributes", || {
        rt.client().get_posture_attributes(&state.device_id)
    })
    .await
    {
        Ok(attrs) => attrs,
        Err(err) => {
            warn!(
                device_id = %state.device_id,
                error = %err,
                "failed to read target device posture for sync diff"
            );
            return Ok(());
        }
    };

    for key in current.keys() {
        let pair = (state.device_id.clone(), key.clone());
        if key.starts_with("custom:") && !expected.contains(&pair) {
            info!(device_id = %state.device_id, key = %key, "removing stale posture attribute during sync");
            if let Err(err) = retry::api("delete posture attribute", || {
                rt.client().delete_posture_attribute(&state.device_id, key)
            })
            .await
            {
                error!(
                    device_id = %state.device_id,
                    key = %key,
                    error = %err,
                    "failed to remove stale posture attribute during sync"
                );
            }
        }
    }
    Ok(())
}
