//! Product and lote mutations with their audit trail.
//!
//! Every write commits through the stores first. The history entries for it
//! (the entity change plus a `product_batch_context` snapshot of the owning
//! product) are written afterwards under one batch id, and a failure there is
//! only logged.

mod error;
mod lotes;
mod products;

pub use error::InventoryError;
pub use lotes::{CreateLoteRequest, LoteService, UpdateLoteRequest};
pub use products::{CreateProductRequest, ProductService, UpdateProductRequest};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use estoque_core::{ChangePayload, NewHistoryRecord, ProductBatchContextChangeDetail, ProductId};

use crate::models::{QUANTITY_SCALE, max_quantity};
use crate::services::history::{AuditContext, HistoryService};

/// Snapshot entry of a product's aggregate quantity around one operation.
fn context_entry(
    product_id: &ProductId,
    product_name: &str,
    before: Decimal,
    after: Decimal,
) -> NewHistoryRecord {
    NewHistoryRecord::new(
        product_id.as_str(),
        ChangePayload::ProductBatchContext(ProductBatchContextChangeDetail {
            product_id: product_id.clone(),
            product_name: product_name.to_owned(),
            quantity_before_batch: before,
            quantity_after_batch: after,
        }),
    )
}

/// Write the audit entries of a committed mutation; failures are logged.
async fn audit(
    history: &HistoryService,
    operation: &'static str,
    entries: Vec<NewHistoryRecord>,
    context: AuditContext,
) {
    if let Err(e) = history.record_operation(entries, context).await {
        tracing::warn!(operation, error = %e, "Failed to record history");
    }
}

fn decimal_value(value: Decimal) -> Value {
    value.to_f64().map_or(Value::Null, Value::from)
}

/// Reject quantities the `NUMERIC(14, 3)` columns would round or overflow.
fn check_storable(quantity: Decimal) -> Result<Decimal, InventoryError> {
    if quantity.normalize().scale() > QUANTITY_SCALE {
        return Err(InventoryError::Validation(format!(
            "Quantity cannot have more than {QUANTITY_SCALE} decimal places"
        )));
    }
    if quantity > max_quantity() {
        return Err(InventoryError::Validation(format!(
            "Quantity cannot exceed {}",
            max_quantity()
        )));
    }
    Ok(quantity)
}

fn require_positive(quantity: Decimal) -> Result<Decimal, InventoryError> {
    let quantity = check_storable(quantity)?;
    if quantity <= Decimal::ZERO {
        return Err(InventoryError::Validation(
            "Quantity must be greater than zero".to_owned(),
        ));
    }
    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_value() {
        assert_eq!(decimal_value(Decimal::new(25, 1)), Value::from(2.5));
        assert_eq!(decimal_value(Decimal::ZERO), Value::from(0.0));
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive(Decimal::ONE).is_ok());
        assert!(require_positive(Decimal::ZERO).is_err());
        assert!(require_positive(Decimal::NEGATIVE_ONE).is_err());
    }

    #[test]
    fn test_sub_milli_quantities_are_rejected() {
        assert!(matches!(
            require_positive(Decimal::new(4, 4)),
            Err(InventoryError::Validation(message)) if message.contains("3 decimal places")
        ));
        assert!(check_storable(Decimal::new(1_234, 3)).is_ok());
        // Trailing zeros do not count as precision.
        assert!(check_storable(Decimal::new(15_000, 4)).is_ok());
    }

    #[test]
    fn test_quantities_above_column_range_are_rejected() {
        assert!(check_storable(max_quantity()).is_ok());
        assert!(matches!(
            check_storable(Decimal::from(1_000_000_000_000_i64)),
            Err(InventoryError::Validation(message)) if message.starts_with("Quantity cannot exceed")
        ));
        assert!(require_positive(Decimal::from(1_000_000_000_000_i64)).is_err());
    }
}
