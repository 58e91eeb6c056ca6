//! Persistence for products, lotes, users and the audit history.
//!
//! ## Tables
//!
//! - `users` - API operators (Argon2id password hashes)
//! - `products` - Stocked products; `quantity` is derived from lotes
//! - `product_lots` - Lotes, cascade-deleted with their product
//! - `history` - Append-only audit records (`changes` JSONB)
//!
//! Services depend on the store traits below rather than on `PgPool`, so the
//! same logic runs against [`memory::MemoryStore`] in tests.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p estoque-cli -- migrate
//! ```

pub mod history;
pub mod lotes;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod products;
pub mod users;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use estoque_core::{
    BatchId, EntityType, HistoryRecord, Lote, LoteId, NewHistoryRecord, Product, ProductId,
};

use crate::models::{
    LoteMutation, LotePatch, NewLote, NewProduct, ProductPatch, ProductRemoval, ProductUpdate,
    User, UserCredentials,
};

pub use history::PgHistoryStore;
pub use lotes::PgLoteStore;
pub use products::PgProductStore;
pub use users::PgUserStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Constraint violation (e.g., duplicate product id).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The write is not allowed in the current state of the data.
    #[error("invalid write: {0}")]
    Invalid(String),
}

/// Rejection of a direct quantity write on a product that has lotes.
pub(crate) const QUANTITY_IS_DERIVED: &str =
    "Quantity is derived from lotes and cannot be set directly";

/// Rejection of a lote write whose product total would not fit the column.
pub(crate) const TOTAL_OUT_OF_RANGE: &str =
    "Total quantity of the product's lotes cannot exceed 99999999999.999";

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

// =============================================================================
// History
// =============================================================================

/// An operation batch as seen by pagination: its id and first record time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRef {
    pub batch_id: BatchId,
    pub earliest_timestamp: DateTime<Utc>,
}

/// One page of distinct batches plus the overall number of batches.
#[derive(Debug, Clone, Default)]
pub struct BatchPage {
    pub batches: Vec<BatchRef>,
    pub total_batches: u64,
}

/// Persistence of audit records. Records are never updated or deleted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert one record, applying id/timestamp/batch defaults.
    async fn insert_one(&self, record: NewHistoryRecord) -> Result<HistoryRecord, RepositoryError>;

    /// Insert all records in one transaction: all land or none do.
    async fn insert_many(
        &self,
        records: Vec<NewHistoryRecord>,
    ) -> Result<Vec<HistoryRecord>, RepositoryError>;

    /// Records for one entity, newest first.
    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<HistoryRecord>, RepositoryError>;

    /// Records of one batch, oldest first (causal order).
    async fn find_by_batch(&self, batch_id: &BatchId)
    -> Result<Vec<HistoryRecord>, RepositoryError>;

    /// All records, newest first.
    async fn list_recent(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, RepositoryError>;

    /// One page (1-based) of distinct batches, ordered by earliest record
    /// time descending then batch id descending.
    async fn list_distinct_batches(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<BatchPage, RepositoryError>;
}

// =============================================================================
// Inventory
// =============================================================================

/// Product persistence. Returned products include their lotes.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Connectivity check behind `/health/ready`.
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError>;

    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Fails with `Conflict` when the id is taken.
    async fn insert_product(&self, product: &NewProduct) -> Result<Product, RepositoryError>;

    /// `None` when the product does not exist. A quantity in the patch fails
    /// with `Invalid` once the product has lotes.
    async fn update_product(
        &self,
        id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<ProductUpdate>, RepositoryError>;

    /// Deletes the product and, by cascade, its lotes.
    async fn delete_product(&self, id: &ProductId)
    -> Result<Option<ProductRemoval>, RepositoryError>;
}

/// Lote persistence. Every write recomputes the owning product's quantity
/// inside the same transaction, failing with `Invalid` when the new total
/// would not fit.
#[async_trait]
pub trait LoteStore: Send + Sync {
    /// `None` when the product does not exist.
    async fn list_lotes(&self, product_id: &ProductId)
    -> Result<Option<Vec<Lote>>, RepositoryError>;

    async fn get_lote(&self, id: LoteId) -> Result<Option<Lote>, RepositoryError>;

    /// `None` when the owning product does not exist.
    async fn insert_lote(&self, lote: &NewLote) -> Result<Option<LoteMutation>, RepositoryError>;

    async fn update_lote(
        &self,
        id: LoteId,
        patch: &LotePatch,
    ) -> Result<Option<LoteMutation>, RepositoryError>;

    async fn delete_lote(&self, id: LoteId) -> Result<Option<LoteMutation>, RepositoryError>;
}

// =============================================================================
// Users
// =============================================================================

/// Credential lookup for login and user provisioning.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, RepositoryError>;

    /// Fails with `Conflict` when the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str)
    -> Result<User, RepositoryError>;
}

/// Map a numeric overflow (SQLSTATE 22003) to `Invalid`, anything else to
/// `Database`.
pub(crate) fn invalid_on_overflow(err: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.code().as_deref() == Some("22003")
    {
        return RepositoryError::Invalid(message.to_owned());
    }
    RepositoryError::Database(err)
}

/// Map a unique violation to `Conflict`, anything else to `Database`.
pub(crate) fn conflict_on_unique(err: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(err)
}
