//! liveness endpoint.

use std::time::Duration;

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::AppState;
use tailgrant_db::WorkflowStore;
use tailgrant_engine::resource::ResourceClient;

/// `GET /health`
///
/// an engine that cannot reach its checkpoint store cannot guarantee
/// revocation, so the probe is a bounded ping of the substrate database:
/// 200 `{"status":"ok"}` when it answers within a second, 503 otherwise.
pub async fn health<C: ResourceClient>(State(state): State<AppState<C>>) -> (StatusCode, Json<Value>) {
    let db_up = tokio::time::timeout(Duration::from_secs(1), state.db.ping())
        .await
        .is_ok_and(|ping| ping.is_ok());

    if db_up {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}
