//! `PostgreSQL` implementation of [`LoteStore`].
//!
//! Each write runs in one transaction that locks the owning product row,
//! applies the lote change and rewrites `products.quantity` as the sum of the
//! product's lotes before committing.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use estoque_core::{Lote, LoteId, ProductId};

use super::products::{LOTE_COLUMNS, LoteRow, ProductRow, lock_product, lotes_for};
use super::{LoteStore, RepositoryError};
use crate::models::{LoteMutation, LotePatch, NewLote, ProductTotals};

/// Recompute the derived product quantity and return the new total.
async fn recompute_quantity(
    conn: &mut PgConnection,
    product_id: &str,
) -> Result<Decimal, RepositoryError> {
    let quantity: Decimal = sqlx::query_scalar(
        r"
        UPDATE products SET
            quantity = (
                SELECT COALESCE(SUM(quantity), 0) FROM product_lots WHERE product_id = $1
            ),
            updated_at = NOW()
        WHERE id = $1
        RETURNING quantity
        ",
    )
    .bind(product_id)
    .fetch_one(conn)
    .await
    .map_err(|e| super::invalid_on_overflow(e, super::TOTAL_OUT_OF_RANGE))?;

    Ok(quantity)
}

/// Lock the product owning `id`, then the lote itself.
///
/// Returns `None` if the lote is gone (or was moved) by the time the product
/// lock is held.
async fn lock_lote(
    conn: &mut PgConnection,
    id: LoteId,
) -> Result<Option<(ProductRow, Lote)>, RepositoryError> {
    let owner: Option<String> =
        sqlx::query_scalar("SELECT product_id FROM product_lots WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(owner) = owner else {
        return Ok(None);
    };

    let Some(product) = lock_product(conn, &owner).await? else {
        return Ok(None);
    };

    let lote = sqlx::query_as::<_, LoteRow>(&format!(
        "SELECT {LOTE_COLUMNS} FROM product_lots
         WHERE id = $1 AND product_id = $2
         FOR UPDATE"
    ))
    .bind(id)
    .bind(&owner)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(lote.map(|row| (product, Lote::from(row))))
}

fn totals(product: ProductRow, quantity_after: Decimal) -> ProductTotals {
    ProductTotals {
        id: ProductId::new(product.id),
        name: product.name,
        quantity_before: product.quantity,
        quantity_after,
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Lote store backed by the `product_lots` table.
#[derive(Clone)]
pub struct PgLoteStore {
    pool: PgPool,
}

impl PgLoteStore {
    /// Create a new lote store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoteStore for PgLoteStore {
    async fn list_lotes(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Vec<Lote>>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
                .bind(product_id)
                .fetch_one(&mut *conn)
                .await?;
        if !exists {
            return Ok(None);
        }

        lotes_for(&mut conn, product_id.as_str()).await.map(Some)
    }

    async fn get_lote(&self, id: LoteId) -> Result<Option<Lote>, RepositoryError> {
        let row = sqlx::query_as::<_, LoteRow>(&format!(
            "SELECT {LOTE_COLUMNS} FROM product_lots WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_lote(&self, lote: &NewLote) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(product) = lock_product(&mut tx, lote.product_id.as_str()).await? else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, LoteRow>(&format!(
            "INSERT INTO product_lots (id, product_id, quantity, expiry_date)
             VALUES ($1, $2, $3, $4)
             RETURNING {LOTE_COLUMNS}"
        ))
        .bind(LoteId::generate())
        .bind(&lote.product_id)
        .bind(lote.quantity)
        .bind(lote.expiry_date)
        .fetch_one(&mut *tx)
        .await?;

        let quantity_after = recompute_quantity(&mut tx, lote.product_id.as_str()).await?;
        tx.commit().await?;

        Ok(Some(LoteMutation {
            lote: row.into(),
            previous: None,
            product: totals(product, quantity_after),
        }))
    }

    async fn update_lote(
        &self,
        id: LoteId,
        patch: &LotePatch,
    ) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some((product, previous)) = lock_lote(&mut tx, id).await? else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, LoteRow>(&format!(
            "UPDATE product_lots SET
                quantity = COALESCE($2, quantity),
                expiry_date = COALESCE($3, expiry_date),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {LOTE_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.quantity)
        .bind(patch.expiry_date)
        .fetch_one(&mut *tx)
        .await?;

        let quantity_after = recompute_quantity(&mut tx, previous.product_id.as_str()).await?;
        tx.commit().await?;

        Ok(Some(LoteMutation {
            lote: row.into(),
            previous: Some(previous),
            product: totals(product, quantity_after),
        }))
    }

    async fn delete_lote(&self, id: LoteId) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some((product, previous)) = lock_lote(&mut tx, id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM product_lots WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let quantity_after = recompute_quantity(&mut tx, previous.product_id.as_str()).await?;
        tx.commit().await?;

        Ok(Some(LoteMutation {
            lote: previous.clone(),
            previous: Some(previous),
            product: totals(product, quantity_after),
        }))
    }
}
