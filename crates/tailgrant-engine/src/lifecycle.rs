//! the grant lifecycle: policy gate, effect application, durable TTL,
//! effect reversal.
//!
//! every transition is checkpointed, so the lifecycle can resume from any
//! point: a pending grant re-awaits its (possibly already decided) gate, an
//! active grant re-arms its timer to the original expiry instant, and a
//! grant that expired or was revoked just before a crash still runs its
//! reversal exactly once.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tailgrant_db::{RunStatus, WorkflowStore};
use tailgrant_types::{
    AddGrantSignal, ApprovalResult, ExtendSignal, GrantAction, GrantState, GrantStatus, GrantType,
    RemoveGrantSignal, RevokeSignal, UserRole,
};

use crate::error::{EngineError, Result};
use crate::resource::{ResourceClient, ResourceError};
use crate::retry;
use crate::runtime::{Runtime, SIGNAL_EXTEND, SIGNAL_REMOVE_GRANT, SIGNAL_REVOKE, device_run_id, to_chrono};

/// drive one grant lifecycle from its current checkpoint to completion.
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
    let mut state: GrantState = serde_json::from_str(&run.state)?;
    let grant_type = rt
        .grant_types()
        .get(&state.request.grant_type_name)
        .cloned()
        .ok_or_else(|| EngineError::UnknownGrantType(state.request.grant_type_name.clone()))?;

    info!(
        grant_id = %state.request.id,
        grant_type = %grant_type.name,
        "grant lifecycle started"
    );

    if state.status == GrantStatus::PendingApproval {
        if grant_type.risk_level.requires_approval() && state.approved_by.is_none() {
            let gate_id = rt
                .start_approval(&state.request.id, &grant_type, &state.request.requester)
                .await?;
            let result: ApprovalResult = serde_json::from_value(rt.await_result(&gate_id).await?)?;

            if !result.approved {
                state.status = GrantStatus::Denied;
                state.denied_by = result.denied_by;
                state.deny_reason = result.reason;
                info!(
                    grant_id = %state.request.id,
                    denied_by = state.denied_by.as_deref().unwrap_or("(timeout)"),
                    "grant denied"
                );
                let json = serde_json::to_string(&state)?;
                rt.db().complete_run(&run_id, &json, &json).await?;
                return Ok(());
            }

            state.approved_by = result.approved_by;
            rt.db()
                .checkpoint(&run_id, &serde_json::to_string(&state)?)
                .await?;
        }

        // apply the effect; a failure here leaves the status pre-activation
        // and fails the lifecycle with no reversal owed
        apply_effect(&rt, &run_id, &mut state, &grant_type).await?;

        let now = Utc::now();
        state.status = GrantStatus::Active;
        state.activated_at = Some(now);
        state.expires_at = Some(now + to_chrono(state.request.duration));
        rt.db()
            .checkpoint(&run_id, &serde_json::to_string(&state)?)
            .await?;
        info!(
            grant_id = %state.request.id,
            expires_at = %state.expires_at.unwrap_or(now),
            "grant activated"
        );
    }

    if state.status == GrantStatus::Active {
        active_loop(&rt, &run_id, &mut state, &grant_type, &mut nudges).await?;
        if state.status == GrantStatus::Active {
            // runtime shut down mid-hold; resume re-arms the timer
            return Ok(());
        }
    }

    if matches!(state.status, GrantStatus::Expired | GrantStatus::Revoked) {
        revert_effect(&rt, &state, &grant_type).await;
    }

    let json = serde_json::to_string(&state)?;
    rt.db().complete_run(&run_id, &json, &json).await?;
    info!(grant_id = %state.request.id, status = %state.status, "grant lifecycle completed");
    Ok(())
}

/// hold the grant: wait concurrently on the durable timer, revocation, and
/// extension until the status leaves `Active`.
async fn active_loop<C: ResourceClient>(
    rt: &Runtime<C>,
    run_id: &str,
    state: &mut GrantState,
    grant_type: &GrantType,
    nudges: &mut mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    while state.status == GrantStatus::Active {
        // drain durably queued signals before arming the timer
        while let Some(sig) = rt.db().next_pending_signal(run_id).await? {
            match sig.name.as_str() {
                SIGNAL_REVOKE => match serde_json::from_str::<RevokeSignal>(&sig.payload) {
                    Ok(payload) => {
                        state.status = GrantStatus::Revoked;
                        state.revoked_at = Some(Utc::now());
                        info!(
                            grant_id = %state.request.id,
                            revoked_by = %payload.revoked_by,
                            reason = %payload.reason,
                            "grant revoked"
                        );
                        state.revoked_by = Some(payload.revoked_by);
                    }
                    Err(err) => {
                        warn!(grant_id = %state.request.id, error = %err, "malformed revoke signal")
                    }
                },
                SIGNAL_EXTEND => match serde_json::from_str::<ExtendSignal>(&sig.payload) {
                    Ok(payload) => {
                        let now = Utc::now();
                        let duration = payload.duration.min(grant_type.max_duration);
                        // never past activation + max, no matter how many
                        // extends arrive
                        let hard_cap =
                            state.activated_at.unwrap_or(now) + to_chrono(grant_type.max_duration);
                        let requested = now + to_chrono(duration);
                        state.expires_at = Some(requested.min(hard_cap));
                        info!(
                            grant_id = %state.request.id,
                            extended_by = %payload.extended_by,
                            expires_at = %state.expires_at.unwrap_or(now),
                            "grant extended"
                        );
                    }
                    Err(err) => {
                        warn!(grant_id = %state.request.id, error = %err, "malformed extend signal")
                    }
                },
                other => {
                    warn!(grant_id = %state.request.id, signal = other, "unexpected signal for grant")
                }
            }
            rt.db()
                .consume_signal(run_id, sig.id, &serde_json::to_string(state)?)
                .await?;
            if state.status != GrantStatus::Active {
                return Ok(());
            }
        }

        let Some(expires_at) = state.expires_at else {
            return Ok(());
        };
        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(remaining) => {
                state.status = GrantStatus::Expired;
                rt.db().checkpoint(run_id, &serde_json::to_string(state)?).await?;
                info!(grant_id = %state.request.id, "grant expired");
            }
            msg = nudges.recv() => {
                if msg.is_none() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// phase 3: apply the grant's effect. All operations are idempotent, so
/// re-running after a crash-resume is safe.
async fn apply_effect<C: ResourceClient>(
    rt: &Runtime<C>,
    run_id: &str,
    state: &mut GrantState,
    grant_type: &GrantType,
) -> Result<()> {
    match grant_type.action {
        GrantAction::Tag => {
            let device_id = target_device(state)?;
            let signal = AddGrantSignal {
                grant_id: state.request.id.clone(),
                tags: grant_type.tags.clone(),
                posture_attributes: grant_type.posture_attributes.clone(),
                requester_device_id: state.request.requester_device_id.clone(),
            };
            rt.signal_with_start_device_manager(&device_id, &signal).await?;
        }
        GrantAction::UserRole => {
            let user_id = target_user(state)?;
            let user = retry::api("get user", || rt.client().get_user(&user_id))
                .await?
                .ok_or_else(|| {
                    EngineError::Resource(ResourceError::NotFound(format!("user {user_id}")))
                })?;

            match UserRole::parse(&user.role) {
                Some(role) => state.original_role = Some(role),
                None => warn!(
                    grant_id = %state.request.id,
                    role = %user.role,
                    "current role is outside the known set; reversal will be skipped"
                ),
            }
            // the original role is checkpointed before the elevation so a
            // resume never reads back the elevated role as "original"
            rt.db()
                .checkpoint(run_id, &serde_json::to_string(state)?)
                .await?;

            let role = grant_type.role.ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "grant type {:?} has no role configured",
                    grant_type.name
                ))
            })?;
            retry::api("set user role", || {
                rt.client().set_user_role(&user_id, role.as_str())
            })
            .await?;
            info!(grant_id = %state.request.id, user_id = %user_id, role = %role, "user role elevated");
        }
        GrantAction::UserRestore => {
            let user_id = target_user(state)?;
            retry::api("restore user", || rt.client().restore_user(&user_id)).await?;
            info!(grant_id = %state.request.id, user_id = %user_id, "user restored");
        }
    }
    Ok(())
}

/// phase 5: revert the grant's effect. Runs whenever activation happened;
/// failures are logged but never re-raised. For tags and posture the
/// reconciler is the safety net; user operations have none beyond the log.
async fn revert_effect<C: ResourceClient>(rt: &Runtime<C>, state: &GrantState, grant_type: &GrantType) {
    let grant_id = &state.request.id;
    match grant_type.action {
        GrantAction::Tag => {
            let Some(device_id) = state.request.target_device_id.as_deref() else {
                return;
            };
            // the manager is live: this grant is one of its active entries
            let signal = RemoveGrantSignal {
                grant_id: grant_id.clone(),
            };
            if let Err(err) = rt
                .signal(&device_run_id(device_id), SIGNAL_REMOVE_GRANT, &signal)
                .await
            {
                error!(
                    grant_id = %grant_id,
                    device_id = %device_id,
                    error = %err,
                    "failed to signal tag removal; the reconciler will strip stale tags"
                );
            }
        }
        GrantAction::UserRole => {
            let Some(user_id) = state.request.target_user_id.as_deref() else {
                return;
            };
            match state.original_role {
                Some(role) => {
                    if let Err(err) = retry::api("set user role", || {
                        rt.client().set_user_role(user_id, role.as_str())
                    })
                    .await
                    {
                        error!(
                            grant_id = %grant_id,
                            user_id = %user_id,
                            role = %role,
                            error = %err,
                            "failed to restore original role; manual intervention required"
                        );
                    } else {
                        info!(grant_id = %grant_id, user_id = %user_id, role = %role, "user role restored");
                    }
                }
                None => {
                    error!(
                        grant_id = %grant_id,
                        user_id = %user_id,
                        "original role unrecorded; skipping role reversal"
                    );
                }
            }
        }
        GrantAction::UserRestore => {
            let Some(user_id) = state.request.target_user_id.as_deref() else {
                return;
            };
            if let Err(err) = retry::api("suspend user", || rt.client().suspend_user(user_id)).await
            {
                error!(
                    grant_id = %grant_id,
                    user_id = %user_id,
                    error = %err,
                    "failed to re-suspend user; manual intervention required"
                );
            } else {
                info!(grant_id = %grant_id, user_id = %user_id, "user re-suspended");
            }
        }
    }
}

fn target_device(state: &GrantState) -> Result<String> {
    state
        .request
        .target_device_id
        .clone()
        .ok_or_else(|| EngineError::InvalidRequest("tag grant has no target device".to_string()))
}

fn target_user(state: &GrantState) -> Result<String> {
    state
        .request
        .target_user_id
        .clone()
        .ok_or_else(|| EngineError::InvalidRequest("user grant has no target user".to_string()))
}
