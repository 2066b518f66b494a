//! error types for the database layer.

/// errors from workflow substrate storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// underlying database error.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// a workflow run row was expected but absent.
    #[error("workflow run not found: {0}")]
    RunNotFound(String),

    /// a run row carried a status string outside the known set.
    #[error("invalid run status: {0:?}")]
    InvalidStatus(String),

    /// unsupported database type in config.
    #[error("unsupported database type: {0:?} (expected \"sqlite\" or \"postgres\")")]
    UnsupportedDbType(String),
}
