//! Inputs to product/lote writes and the state they report back.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use estoque_core::{Lote, Product, ProductId, Unit};

/// Decimal places kept by the `NUMERIC(14, 3)` quantity columns.
pub const QUANTITY_SCALE: u32 = 3;

/// Largest value the `NUMERIC(14, 3)` quantity columns hold.
#[must_use]
pub fn max_quantity() -> Decimal {
    Decimal::new(99_999_999_999_999, QUANTITY_SCALE)
}

/// A product about to be inserted. The id is already resolved.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: ProductId,
    pub name: String,
    pub unit: Unit,
    pub quantity: Decimal,
}

/// Partial product update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub unit: Option<Unit>,
    /// Only honoured while the product has no lotes.
    pub quantity: Option<Decimal>,
}

impl ProductPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.unit.is_none() && self.quantity.is_none()
    }
}

/// Product state on both sides of an update.
#[derive(Debug, Clone)]
pub struct ProductUpdate {
    pub before: Product,
    pub after: Product,
}

/// What a product delete removed.
#[derive(Debug, Clone)]
pub struct ProductRemoval {
    /// The product as it was just before deletion.
    pub product: Product,
    /// Number of lotes removed with it.
    pub lote_count: u64,
}

/// A lote about to be inserted under an existing product.
#[derive(Debug, Clone)]
pub struct NewLote {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub expiry_date: NaiveDate,
}

/// Partial lote update.
#[derive(Debug, Clone, Default)]
pub struct LotePatch {
    pub quantity: Option<Decimal>,
    pub expiry_date: Option<NaiveDate>,
}

/// Aggregate quantity of the owning product around one lote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTotals {
    pub id: ProductId,
    pub name: String,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
}

/// Result of a committed lote create/update/delete.
#[derive(Debug, Clone)]
pub struct LoteMutation {
    /// The lote after the write; for deletes, the lote that was removed.
    pub lote: Lote,
    /// The lote before the write (updates and deletes).
    pub previous: Option<Lote>,
    pub product: ProductTotals,
}
