//! engine error types.

use crate::resource::ResourceError;

/// errors from the workflow runtime.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// substrate storage error.
    #[error("storage error: {0}")]
    Db(#[from] tailgrant_db::Error),

    /// a checkpoint or payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// a control-plane operation failed after retries.
    #[error("control-plane error: {0}")]
    Resource(#[from] ResourceError),

    /// no run with this workflow id.
    #[error("workflow not found: {0}")]
    RunNotFound(String),

    /// the run exists but is not running, so it cannot receive signals.
    #[error("workflow {0} is not running")]
    RunNotRunning(String),

    /// an awaited run stopped without producing a result.
    #[error("workflow {id} failed: {error}")]
    RunFailed {
        /// the failed run.
        id: String,
        /// its recorded error.
        error: String,
    },

    /// a grant references a grant type missing from the loaded config.
    #[error("unknown grant type: {0:?}")]
    UnknownGrantType(String),

    /// a request reached the engine missing a field its action requires.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
