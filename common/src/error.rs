use thiserror::Error;
use tokio::task::JoinError;

/// Closed error taxonomy shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("ownership error: {0}")]
    Ownership(String),
    #[error("ingestion error: {0}")]
    Ingestion(String),
    #[error("retrieval error: {0}")]
    Retrieval(String),
    #[error("failed to spawn generation subprocess: {0}")]
    GenerationSpawn(String),
    #[error("generation subprocess io error: {0}")]
    GenerationIo(String),
    #[error("generation timed out waiting for output")]
    GenerationTimeout,
    #[error("generation subprocess exited with status {0}")]
    GenerationExit(i32),
    #[error("generation output failed to parse: {0}")]
    GenerationFormat(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// True for errors that represent cooperative cancellation rather than failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
