//! grant endpoints: create, query, approve, deny, revoke, extend.
//!
//! validation that depends only on the request and config happens here
//! (caller errors surface as 4xx before any workflow starts); everything
//! stateful is delegated to the engine.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use tailgrant_engine::resource::ResourceClient;
use tailgrant_engine::{
    SIGNAL_APPROVE, SIGNAL_DENY, SIGNAL_EXTEND, SIGNAL_REVOKE, approval_run_id, grant_run_id, retry,
};
use tailgrant_types::{
    ApproveSignal, DenySignal, ExtendSignal, GrantAction, GrantRequest, GrantState, GrantStatus,
    RevokeSignal,
};

use super::error::ApiError;
use super::identity::Caller;

/// request body for creating a grant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGrantRequest {
    /// name of the configured grant type.
    pub grant_type_name: String,
    /// target device (tag grants).
    #[serde(default)]
    pub target_device_id: Option<String>,
    /// target user (user grants).
    #[serde(default)]
    pub target_user_id: Option<String>,
    /// how long to hold the grant, e.g. "30m".
    pub duration: String,
    /// free-form justification.
    #[serde(default)]
    pub reason: String,
}

/// response for a created grant.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGrantResponse {
    pub id: String,
    pub workflow_id: String,
    pub status: &'static str,
}

/// response for signal endpoints.
#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub id: String,
    pub status: &'static str,
}

/// `POST /api/grants`
pub async fn create_grant<C: ResourceClient>(
    caller: Caller,
    State(state): State<AppState<C>>,
    Json(req): Json<CreateGrantRequest>,
) -> Result<(StatusCode, Json<CreateGrantResponse>), ApiError> {
    let grant_type = state
        .runtime
        .grant_types()
        .get(&req.grant_type_name)
        .ok_or_else(|| ApiError::bad_request(format!("unknown grant type: {:?}", req.grant_type_name)))?
        .clone();

    let duration = humantime::parse_duration(&req.duration)
        .map_err(|e| ApiError::bad_request(format!("invalid duration: {e}")))?;
    if duration.is_zero() {
        return Err(ApiError::bad_request("duration must be positive"));
    }
    if duration > grant_type.max_duration {
        return Err(ApiError::bad_request(format!(
            "duration {} exceeds max {} for grant type {:?}",
            humantime::format_duration(duration),
            humantime::format_duration(grant_type.max_duration),
            grant_type.name
        )));
    }

    match grant_type.action {
        GrantAction::Tag => {
            let device_id = req
                .target_device_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ApiError::bad_request("targetDeviceId is required for tag grants"))?;
            let device = retry::api("get device", || state.runtime.client().get_device(device_id))
                .await
                .map_err(ApiError::internal)?;
            if device.is_none() {
                return Err(ApiError::bad_request(format!(
                    "target device not found: {device_id}"
                )));
            }
        }
        GrantAction::UserRole | GrantAction::UserRestore => {
            let user_id = req
                .target_user_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ApiError::bad_request("targetUserId is required for user grants"))?;
            let user = retry::api("get user", || state.runtime.client().get_user(user_id))
                .await
                .map_err(ApiError::internal)?;
            if user.is_none() {
                return Err(ApiError::bad_request(format!(
                    "target user not found: {user_id}"
                )));
            }
        }
    }

    let id = Uuid::new_v4().to_string();
    let request = GrantRequest {
        id: id.clone(),
        requester: caller.login,
        requester_device_id: caller.device_id,
        grant_type_name: req.grant_type_name,
        target_device_id: req.target_device_id.filter(|s| !s.is_empty()),
        target_user_id: req.target_user_id.filter(|s| !s.is_empty()),
        duration,
        reason: req.reason,
        requested_at: Utc::now(),
    };

    state.runtime.start_grant(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateGrantResponse {
            workflow_id: grant_run_id(&id),
            id,
            status: "started",
        }),
    ))
}

/// `GET /api/grants/{id}`
pub async fn get_grant<C: ResourceClient>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<GrantState>, ApiError> {
    let grant = state
        .runtime
        .grant_state(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("grant {id} not found")))?;
    Ok(Json(grant))
}

/// `GET /api/grants`
pub async fn list_grants<C: ResourceClient>(
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<GrantState>>, ApiError> {
    let grants = state.runtime.list_grant_states().await?;
    Ok(Json(grants))
}

/// `POST /api/grants/{id}/approve`
///
/// preconditions checked here ahead of the gate's own rejection: the grant
/// must be pending approval and the caller must not be the requester.
pub async fn approve_grant<C: ResourceClient>(
    caller: Caller,
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> Result<Json<SignalResponse>, ApiError> {
    let grant = state
        .runtime
        .grant_state(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("grant {id} not found")))?;

    if grant.status != GrantStatus::PendingApproval {
        return Err(ApiError::conflict(format!(
            "grant is {}, not pending approval",
            grant.status
        )));
    }
    if grant.request.requester == caller.login {
        return Err(ApiError::forbidden("cannot approve your own grant request"));
    }

    state
        .runtime
        .signal(
            &approval_run_id(&id),
            SIGNAL_APPROVE,
            &ApproveSignal {
                approved_by: caller.login,
            },
        )
        .await?;

    Ok(Json(SignalResponse {
        id,
        status: "approved",
    }))
}

/// request body for denying a grant.
#[derive(Debug, Deserialize)]
pub struct DenyRequest {
    /// why the grant is denied.
    #[serde(default)]
    pub reason: String,
}

/// `POST /api/grants/{id}/deny`
pub async fn deny_grant<C: ResourceClient>(
    caller: Caller,
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<DenyRequest>,
) -> Result<Json<SignalResponse>, ApiError> {
    state
        .runtime
        .signal(
            &approval_run_id(&id),
            SIGNAL_DENY,
            &DenySignal {
                denied_by: caller.login,
                reason: body.reason,
            },
        )
        .await?;

    Ok(Json(SignalResponse {
        id,
        status: "denied",
    }))
}

/// request body for revoking a grant.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    /// why the grant is revoked.
    #[serde(default)]
    pub reason: String,
}

/// `POST /api/grants/{id}/revoke`
pub async fn revoke_grant<C: ResourceClient>(
    caller: Caller,
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<SignalResponse>, ApiError> {
    state
        .runtime
        .signal(
            &grant_run_id(&id),
            SIGNAL_REVOKE,
            &RevokeSignal {
                revoked_by: caller.login,
                reason: body.reason,
            },
        )
        .await?;

    Ok(Json(SignalResponse {
        id,
        status: "revoked",
    }))
}

/// request body for extending a grant.
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    /// new duration measured from receipt, e.g. "1h".
    pub duration: String,
}

/// `POST /api/grants/{id}/extend`
pub async fn extend_grant<C: ResourceClient>(
    caller: Caller,
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
    Json(body): Json<ExtendRequest>,
) -> Result<Json<SignalResponse>, ApiError> {
    let duration = humantime::parse_duration(&body.duration)
        .map_err(|e| ApiError::bad_request(format!("invalid duration: {e}")))?;
    if duration.is_zero() {
        return Err(ApiError::bad_request("duration must be positive"));
    }

    state
        .runtime
        .signal(
            &grant_run_id(&id),
            SIGNAL_EXTEND,
            &ExtendSignal {
                extended_by: caller.login,
                duration,
            },
        )
        .await?;

    Ok(Json(SignalResponse {
        id,
        status: "extended",
    }))
}
