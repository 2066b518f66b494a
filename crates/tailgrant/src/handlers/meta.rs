//! informational endpoints: identity echo, grant types, devices, users.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;
use tailgrant_engine::resource::{Device, ResourceClient, UserInfo};
use tailgrant_engine::retry;
use tailgrant_types::GrantType;

use super::error::ApiError;
use super::identity::Caller;

/// response for the whoami endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    pub login: String,
    pub device_id: String,
}

/// `GET /api/whoami`
pub async fn whoami(caller: Caller) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        login: caller.login,
        device_id: caller.device_id,
    })
}

/// `GET /api/grant-types`
pub async fn list_grant_types<C: ResourceClient>(
    State(state): State<AppState<C>>,
) -> Json<Vec<GrantType>> {
    let types = state
        .runtime
        .grant_types()
        .list()
        .into_iter()
        .cloned()
        .collect();
    Json(types)
}

/// device representation in api responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub id: String,
    pub tags: Vec<String>,
}

impl From<Device> for DeviceResponse {
    fn from(d: Device) -> Self {
        Self {
            id: d.id,
            tags: d.tags,
        }
    }
}

/// `GET /api/devices`
pub async fn list_devices<C: ResourceClient>(
    _caller: Caller,
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<DeviceResponse>>, ApiError> {
    let devices = retry::api("list devices", || state.runtime.client().list_devices())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(devices.into_iter().map(DeviceResponse::from).collect()))
}

/// user representation in api responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub role: String,
    pub status: String,
}

impl From<UserInfo> for UserResponse {
    fn from(u: UserInfo) -> Self {
        Self {
            id: u.id,
            role: u.role,
            status: u.status,
        }
    }
}

/// `GET /api/users`
pub async fn list_users<C: ResourceClient>(
    _caller: Caller,
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = retry::api("list users", || state.runtime.client().list_users())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}
