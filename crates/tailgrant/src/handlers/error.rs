//! api error handling for http handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use tailgrant_engine::EngineError;

/// api error type for handler responses
#[derive(Debug)]
pub enum ApiError {
    /// malformed or invalid request (400)
    BadRequest(String),
    /// missing or unresolvable identity (401)
    Unauthorized(String),
    /// the caller may not perform this action (403)
    Forbidden(String),
    /// not found (404)
    NotFound(String),
    /// the grant is not in a state that allows this action (409)
    Conflict(String),
    /// internal server error (500); the message shown is opaque
    Internal(String),
}

impl ApiError {
    /// create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// create an internal error from any error type
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RunNotFound(_) => ApiError::NotFound("grant not found".to_string()),
            EngineError::RunNotRunning(_) => {
                ApiError::Conflict("grant is no longer accepting signals".to_string())
            }
            EngineError::UnknownGrantType(name) => {
                ApiError::BadRequest(format!("unknown grant type: {name:?}"))
            }
            EngineError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            other => ApiError::internal(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                // the real cause goes to the log, not the caller
                error!(error = %msg, "internal error serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
