//! caller identity extraction.
//!
//! tailgrant runs behind an identity-aware ingress (tailscale serve or an
//! equivalent proxy) that resolves who is calling and injects it as
//! headers. The adapter trusts the resolved principal and never
//! re-verifies it; requests without an identity are rejected before any
//! handler runs.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::error::ApiError;

/// header carrying the caller's login, set by the ingress.
pub const LOGIN_HEADER: &str = "tailscale-user-login";

/// header carrying the caller's device id, set by the ingress.
pub const DEVICE_HEADER: &str = "tailscale-node-id";

/// the resolved caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// login name, e.g. `alice@example.com`.
    pub login: String,
    /// stable id of the device the request came from; may be empty for
    /// callers outside the tailnet.
    pub device_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let login = parts
            .headers
            .get(LOGIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing identity"))?
            .to_string();

        let device_id = parts
            .headers
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(Caller { login, device_id })
    }
}
