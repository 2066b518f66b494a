//! shared types for tailgrant.
//!
//! this crate holds the validated domain vocabulary:
//! - Tags and posture attribute keys (validated newtypes)
//! - Grant types, requests, and queryable grant state
//! - Workflow signal payloads (stable wire contract)
//! - Configuration loading and the grant type store

#![warn(missing_docs)]

mod config;
mod error;
mod grant;
mod posture;
mod signal;
mod store;
mod tag;

pub use config::{Config, DatabaseConfig, GrantTypeConfig, ReconcilerConfig, ServerConfig, TailscaleConfig};
pub use error::ConfigError;
pub use grant::{
    GrantAction, GrantAssets, GrantRequest, GrantState, GrantStatus, GrantType, RiskLevel, UserRole,
};
pub use posture::{PostureAttribute, PostureKey, PostureKeyError, PostureTarget};
pub use signal::{
    AddGrantSignal, ApprovalResult, ApproveSignal, DenySignal, ExtendSignal, RemoveGrantSignal,
    RevokeSignal, SyncSignal,
};
pub use store::GrantTypeStore;
pub use tag::{Tag, TagError};
