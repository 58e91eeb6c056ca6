//! `PostgreSQL` implementation of [`ProductStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use estoque_core::{Lote, LoteId, Product, ProductId, Unit};

use super::{ProductStore, RepositoryError};
use crate::models::{NewProduct, ProductPatch, ProductRemoval, ProductUpdate};

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for product queries.
#[derive(Debug, sqlx::FromRow)]
pub(super) struct ProductRow {
    pub(super) id: String,
    pub(super) name: String,
    unit: Unit,
    pub(super) quantity: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_product(self, lotes: Vec<Lote>) -> Product {
        Product {
            id: ProductId::new(self.id),
            name: self.name,
            unit: self.unit,
            quantity: self.quantity,
            lotes: Some(lotes),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Internal row type for lote queries.
#[derive(Debug, sqlx::FromRow)]
pub(super) struct LoteRow {
    id: Uuid,
    product_id: String,
    quantity: Decimal,
    expiry_date: NaiveDate,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LoteRow> for Lote {
    fn from(row: LoteRow) -> Self {
        Self {
            id: LoteId::new(row.id),
            product_id: ProductId::new(row.product_id),
            quantity: row.quantity,
            expiry_date: row.expiry_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(super) const PRODUCT_COLUMNS: &str = "id, name, unit, quantity, created_at, updated_at";
pub(super) const LOTE_COLUMNS: &str =
    "id, product_id, quantity, expiry_date, created_at, updated_at";

/// Lock a product row for the rest of the transaction.
///
/// Every write that touches a product or its lotes takes this lock first, so
/// lock order is always product then lote.
pub(super) async fn lock_product(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<ProductRow>, RepositoryError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

pub(super) async fn lotes_for(
    conn: &mut PgConnection,
    product_id: &str,
) -> Result<Vec<Lote>, RepositoryError> {
    let rows = sqlx::query_as::<_, LoteRow>(&format!(
        "SELECT {LOTE_COLUMNS} FROM product_lots
         WHERE product_id = $1
         ORDER BY expiry_date ASC, created_at ASC"
    ))
    .bind(product_id)
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

// =============================================================================
// Repository
// =============================================================================

/// Product store backed by the `products` and `product_lots` tables.
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    /// Create a new product store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let products = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let lotes = sqlx::query_as::<_, LoteRow>(&format!(
            "SELECT {LOTE_COLUMNS} FROM product_lots ORDER BY expiry_date ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_product: HashMap<String, Vec<Lote>> = HashMap::new();
        for row in lotes {
            let lote = Lote::from(row);
            by_product
                .entry(lote.product_id.as_str().to_owned())
                .or_default()
                .push(lote);
        }

        Ok(products
            .into_iter()
            .map(|row| {
                let lotes = by_product.remove(&row.id).unwrap_or_default();
                row.into_product(lotes)
            })
            .collect())
    }

    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lotes = lotes_for(&mut conn, &row.id).await?;
        Ok(Some(row.into_product(lotes)))
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "INSERT INTO products (id, name, unit, quantity)
             VALUES ($1, $2, $3, $4)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.unit)
        .bind(product.quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            super::conflict_on_unique(e, &format!("product {} already exists", product.id))
        })?;

        Ok(row.into_product(Vec::new()))
    }

    async fn update_product(
        &self,
        id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<ProductUpdate>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = lock_product(&mut tx, id.as_str()).await? else {
            return Ok(None);
        };
        let lotes = lotes_for(&mut tx, id.as_str()).await?;

        // Lote writes lock the product row too, so this cannot go stale.
        if patch.quantity.is_some() && !lotes.is_empty() {
            return Err(RepositoryError::Invalid(super::QUANTITY_IS_DERIVED.to_owned()));
        }

        let after = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products SET
                name = COALESCE($2, name),
                unit = COALESCE($3, unit),
                quantity = COALESCE($4, quantity),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.unit)
        .bind(patch.quantity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ProductUpdate {
            before: before.into_product(lotes.clone()),
            after: after.into_product(lotes),
        }))
    }

    async fn delete_product(
        &self,
        id: &ProductId,
    ) -> Result<Option<ProductRemoval>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = lock_product(&mut tx, id.as_str()).await? else {
            return Ok(None);
        };
        let lotes = lotes_for(&mut tx, id.as_str()).await?;

        // product_lots rows go with it (ON DELETE CASCADE).
        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let lote_count = lotes.len() as u64;
        Ok(Some(ProductRemoval {
            product: row.into_product(lotes),
            lote_count,
        }))
    }
}
