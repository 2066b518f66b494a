//! the approval gate: collect a single approve/deny decision from an
//! authorized human, with a hard timeout.
//!
//! rejected signals (self-approval, non-approvers) do not consume the gate;
//! it keeps waiting until a valid decision or the deadline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tailgrant_db::{RunStatus, WorkflowStore};
use tailgrant_types::{ApprovalResult, ApproveSignal, DenySignal, GrantType};

use crate::error::Result;
use crate::resource::ResourceClient;
use crate::runtime::{Runtime, SIGNAL_APPROVE, SIGNAL_DENY, to_chrono};

/// how long a gate waits for a decision before denying.
pub const APPROVAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// checkpointed state of an approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ApprovalState {
    pub grant_id: String,
    pub requester: String,
    pub approvers: Vec<String>,
    /// absolute deadline; re-armed to this instant across restarts.
    pub deadline: DateTime<Utc>,
}

impl ApprovalState {
    pub fn new(grant_id: &str, grant_type: &GrantType, requester: &str) -> Self {
        Self {
            grant_id: grant_id.to_string(),
            requester: requester.to_string(),
            approvers: grant_type.approvers.clone(),
            deadline: Utc::now() + to_chrono(APPROVAL_TIMEOUT),
        }
    }
}

/// drive one approval gate to its decision.
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
    let state: ApprovalState = serde_json::from_str(&run.state)?;
    let state_json = serde_json::to_string(&state)?;
    info!(grant_id = %state.grant_id, "approval gate started");

    loop {
        while let Some(sig) = rt.db().next_pending_signal(&run_id).await? {
            match sig.name.as_str() {
                SIGNAL_APPROVE => {
                    let payload: ApproveSignal = match serde_json::from_str(&sig.payload) {
                        Ok(p) => p,
                        Err(err) => {
                            warn!(grant_id = %state.grant_id, error = %err, "malformed approve signal");
                            rt.db().consume_signal(&run_id, sig.id, &state_json).await?;
                            continue;
                        }
                    };

                    if payload.approved_by == state.requester {
                        warn!(
                            grant_id = %state.grant_id,
                            attempted_by = %payload.approved_by,
                            "self-approval rejected"
                        );
                        rt.db().consume_signal(&run_id, sig.id, &state_json).await?;
                        continue;
                    }

                    if !state.approvers.is_empty() && !state.approvers.contains(&payload.approved_by)
                    {
                        warn!(
                            grant_id = %state.grant_id,
                            attempted_by = %payload.approved_by,
                            "unauthorized approval attempt"
                        );
                        rt.db().consume_signal(&run_id, sig.id, &state_json).await?;
                        continue;
                    }

                    info!(grant_id = %state.grant_id, approved_by = %payload.approved_by, "grant approved");
                    let result = ApprovalResult {
                        approved: true,
                        approved_by: Some(payload.approved_by),
                        denied_by: None,
                        reason: None,
                    };
                    return decide(&rt, &run_id, &state, sig.id, &result).await;
                }
                SIGNAL_DENY => {
                    let payload: DenySignal = match serde_json::from_str(&sig.payload) {
                        Ok(p) => p,
                        Err(err) => {
                            warn!(grant_id = %state.grant_id, error = %err, "malformed deny signal");
                            rt.db().consume_signal(&run_id, sig.id, &state_json).await?;
                            continue;
                        }
                    };

                    info!(grant_id = %state.grant_id, denied_by = %payload.denied_by, "grant denied");
                    let result = ApprovalResult {
                        approved: false,
                        approved_by: None,
                        denied_by: Some(payload.denied_by),
                        reason: Some(payload.reason),
                    };
                    return decide(&rt, &run_id, &state, sig.id, &result).await;
                }
                other => {
                    warn!(grant_id = %state.grant_id, signal = other, "unexpected signal for approval gate");
                    rt.db().consume_signal(&run_id, sig.id, &state_json).await?;
                }
            }
        }

        let remaining = (state.deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {
                info!(grant_id = %state.grant_id, "approval timed out");
                let result = ApprovalResult {
                    approved: false,
                    approved_by: None,
                    denied_by: None,
                    reason: Some("approval timed out".to_string()),
                };
                let state_json = serde_json::to_string(&state)?;
                let result_json = serde_json::to_string(&result)?;
                rt.db().complete_run(&run_id, &state_json, &result_json).await?;
                return Ok(());
            }
            msg = nudges.recv() => {
                if msg.is_none() {
                    // runtime shut down; the gate resumes from its checkpoint
                    return Ok(());
                }
            }
        }
    }
}

/// record the decision: the deciding signal is consumed and the run
/// completed in one transaction, so a crash can neither lose the decision
/// nor redeliver it.
async fn decide<C: ResourceClient>(
    rt: &Runtime<C>,
    run_id: &str,
    state: &ApprovalState,
    signal_id: i64,
    result: &ApprovalResult,
) -> Result<()> {
    let state_json = serde_json::to_string(state)?;
    let result_json = serde_json::to_string(result)?;
    rt.db()
        .consume_signal_and_complete(run_id, signal_id, &state_json, &result_json)
        .await?;
    Ok(())
}
