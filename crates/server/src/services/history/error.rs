//! History service error types.

use thiserror::Error;

use crate::db::RepositoryError;

/// Errors that can occur while recording or reading history.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// `create_batch` was called with no entries.
    #[error("Empty batch - no history entries provided")]
    EmptyBatch,

    /// The entry itself is unusable (blank entity id, missing batch id).
    #[error("{0}")]
    Validation(String),

    /// A record with the same id already exists.
    #[error("{0}")]
    Conflict(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for HistoryError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            other => Self::Repository(other),
        }
    }
}
