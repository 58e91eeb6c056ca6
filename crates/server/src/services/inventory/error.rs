//! Inventory service error types.

use thiserror::Error;

use crate::db::RepositoryError;

/// Errors that can occur during product and lote operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Input rejected before any write.
    #[error("{0}")]
    Validation(String),

    /// Product not found.
    #[error("Product not found")]
    ProductNotFound,

    /// Lote not found.
    #[error("Lote not found")]
    LoteNotFound,

    /// Write conflicts with existing state (duplicate product id).
    #[error("{0}")]
    Conflict(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for InventoryError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            RepositoryError::Invalid(message) => Self::Validation(message),
            other => Self::Repository(other),
        }
    }
}
