//! configuration error types.

use std::path::PathBuf;

/// errors rejecting a configuration at startup.
///
/// any of these means the process refuses to run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// the config file could not be read.
    #[error("reading config {path}: {source}")]
    Read {
        /// path that failed to read.
        path: PathBuf,
        /// underlying io error.
        source: std::io::Error,
    },

    /// the config file could not be parsed. Invalid tags, posture keys,
    /// actions, roles, risk levels, and durations all surface here via
    /// validated deserialization.
    #[error("parsing config {path}: {source}")]
    Parse {
        /// path that failed to parse.
        path: PathBuf,
        /// underlying yaml error.
        source: serde_yaml::Error,
    },

    /// two grant types share a name.
    #[error("duplicate grant type: {0:?}")]
    DuplicateGrantType(String),

    /// a tag-action grant type assigns nothing.
    #[error("grant type {0:?}: tag action must have at least one tag or posture attribute")]
    EmptyTagAction(String),

    /// a user-role grant type has no role.
    #[error("grant type {0:?}: user_role action requires a role")]
    MissingRole(String),

    /// a medium/high risk grant type has no approvers.
    #[error("grant type {0:?}: medium/high risk requires at least one approver")]
    MissingApprovers(String),

    /// a grant type's max duration is zero.
    #[error("grant type {0:?}: maxDuration must be positive")]
    NonPositiveDuration(String),

    /// a posture attribute has a null value.
    #[error("grant type {grant_type:?}: posture attribute {key:?} must have a value")]
    NullPostureValue {
        /// the offending grant type.
        grant_type: String,
        /// the offending key.
        key: String,
    },
}
