//! Products and their lotes (stock batches).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{LoteId, ProductId};
use super::unit::Unit;

/// Date format accepted for lote expiry dates.
pub const EXPIRY_DATE_FORMAT: &str = "%Y-%m-%d";

/// A stocked product.
///
/// `quantity` is derived: once a product has lotes it always equals the sum
/// of their quantities and is never written directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub unit: Unit,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lotes: Option<Vec<Lote>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A batch of a product with its own quantity and expiry date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lote {
    pub id: LoteId,
    pub product_id: ProductId,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    pub expiry_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An expiry date that is not a `YYYY-MM-DD` calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid expiry date: {0} (expected YYYY-MM-DD)")]
pub struct ExpiryDateError(pub String);

/// Parse a `YYYY-MM-DD` expiry date.
///
/// # Errors
///
/// Returns `ExpiryDateError` naming the offending input if it is not a valid
/// calendar date in that format.
pub fn parse_expiry_date(s: &str) -> Result<NaiveDate, ExpiryDateError> {
    NaiveDate::parse_from_str(s.trim(), EXPIRY_DATE_FORMAT)
        .map_err(|_| ExpiryDateError(s.to_owned()))
}
