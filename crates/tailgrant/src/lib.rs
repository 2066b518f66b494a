//! tailgrant library - HTTP adapter and application setup.
//!
//! the adapter is deliberately thin: it parses and validates requests,
//! resolves the caller, and forwards to the orchestration engine. The
//! engine owns every lifecycle invariant.

pub mod cli;
pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use tailgrant_db::TailgrantDb;
use tailgrant_engine::{Runtime, resource::ResourceClient};

/// application state shared across handlers.
pub struct AppState<C: ResourceClient> {
    /// the workflow runtime.
    pub runtime: Runtime<C>,
    /// database handle, used by the health check.
    pub db: TailgrantDb,
}

impl<C: ResourceClient> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            db: self.db.clone(),
        }
    }
}

/// create the axum application with all routes.
pub fn create_app<C: ResourceClient>(runtime: Runtime<C>, db: TailgrantDb) -> Router {
    let state = AppState { runtime, db };

    Router::new()
        .route("/health", get(handlers::health::<C>))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/grant-types", get(handlers::list_grant_types::<C>))
        .route("/api/devices", get(handlers::list_devices::<C>))
        .route("/api/users", get(handlers::list_users::<C>))
        .route(
            "/api/grants",
            post(handlers::create_grant::<C>).get(handlers::list_grants::<C>),
        )
        .route("/api/grants/{id}", get(handlers::get_grant::<C>))
        .route("/api/grants/{id}/approve", post(handlers::approve_grant::<C>))
        .route("/api/grants/{id}/deny", post(handlers::deny_grant::<C>))
        .route("/api/grants/{id}/revoke", post(handlers::revoke_grant::<C>))
        .route("/api/grants/{id}/extend", post(handlers::extend_grant::<C>))
        .with_state(state)
}
