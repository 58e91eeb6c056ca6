//! Product CRUD.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use estoque_core::{
    ChangeAction, ChangePayload, ChangedField, NewHistoryRecord, Product, ProductChange,
    ProductId, Unit,
};

use super::{InventoryError, audit, check_storable, context_entry, decimal_value};
use crate::db::{ProductStore, QUANTITY_IS_DERIVED};
use crate::models::{NewProduct, ProductPatch};
use crate::services::history::{AuditContext, HistoryService};

/// Body of `POST /products`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    /// Generated when absent or blank.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity: Option<Decimal>,
}

/// Body of `PUT /products/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity: Option<Decimal>,
}

fn validate_name(name: &str) -> Result<String, InventoryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InventoryError::Validation(
            "Product name cannot be empty".to_owned(),
        ));
    }
    Ok(name.to_owned())
}

fn parse_unit(unit: &str) -> Result<Unit, InventoryError> {
    unit.parse()
        .map_err(|_| InventoryError::Validation("Invalid unit value. Must be 'L' or 'kg'.".to_owned()))
}

fn validate_quantity(quantity: Decimal) -> Result<Decimal, InventoryError> {
    let quantity = check_storable(quantity)?;
    if quantity < Decimal::ZERO {
        return Err(InventoryError::Validation(
            "Quantity cannot be negative".to_owned(),
        ));
    }
    Ok(quantity)
}

/// Fields that differ between two committed states of a product.
fn changed_fields(before: &Product, after: &Product) -> Vec<ChangedField> {
    let mut fields = Vec::new();
    if before.name != after.name {
        fields.push(ChangedField::new("name", before.name.as_str(), after.name.as_str()));
    }
    if before.unit != after.unit {
        fields.push(ChangedField::new("unit", before.unit.symbol(), after.unit.symbol()));
    }
    if before.quantity != after.quantity {
        fields.push(ChangedField::new(
            "quantity",
            decimal_value(before.quantity),
            decimal_value(after.quantity),
        ));
    }
    fields
}

/// Product service.
#[derive(Clone)]
pub struct ProductService {
    products: Arc<dyn ProductStore>,
    history: HistoryService,
}

impl ProductService {
    /// Create a new product service.
    #[must_use]
    pub fn new(products: Arc<dyn ProductStore>, history: HistoryService) -> Self {
        Self { products, history }
    }

    /// All products with their lotes, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Repository` if the query fails.
    pub async fn list(&self) -> Result<Vec<Product>, InventoryError> {
        Ok(self.products.list_products().await?)
    }

    /// One product with its lotes.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::ProductNotFound` if it does not exist.
    pub async fn get(&self, id: &ProductId) -> Result<Product, InventoryError> {
        self.products
            .get_product(id)
            .await?
            .ok_or(InventoryError::ProductNotFound)
    }

    /// Create a product.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` for a blank name, an unknown unit
    /// or a quantity that is negative or does not fit the column, and
    /// `InventoryError::Conflict` when the id is already taken.
    #[instrument(skip(self, request, context), fields(product_id))]
    pub async fn create(
        &self,
        request: CreateProductRequest,
        context: AuditContext,
    ) -> Result<Product, InventoryError> {
        let name = validate_name(&request.name)?;
        let unit = parse_unit(&request.unit)?;
        let quantity = validate_quantity(request.quantity.unwrap_or_default())?;
        let id = request
            .id
            .map(ProductId::new)
            .filter(|id| !id.is_blank())
            .unwrap_or_else(ProductId::generate);
        tracing::Span::current().record("product_id", id.as_str());

        let product = self
            .products
            .insert_product(&NewProduct {
                id,
                name,
                unit,
                quantity,
            })
            .await?;

        tracing::info!(product_id = %product.id, "Product created");

        let mut change = ProductChange::new(ChangeAction::Created);
        change.product_id = Some(product.id.clone());
        change.product_name = Some(product.name.clone());
        change.quantity_after = Some(product.quantity);
        change.is_new_product = true;

        audit(
            &self.history,
            "product.create",
            vec![
                NewHistoryRecord::new(product.id.as_str(), ChangePayload::Product(change)),
                context_entry(&product.id, &product.name, Decimal::ZERO, product.quantity),
            ],
            context,
        )
        .await;

        Ok(product)
    }

    /// Update name, unit and (while the product has no lotes) quantity.
    ///
    /// A request that changes nothing returns the product untouched and
    /// records no history. The recorded changed fields are taken from the
    /// committed before/after states.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::ProductNotFound` if it does not exist, or
    /// `InventoryError::Validation` for invalid fields or a quantity on a
    /// product that has lotes (checked again inside the store's transaction).
    #[instrument(skip(self, request, context), fields(product_id = %id))]
    pub async fn update(
        &self,
        id: &ProductId,
        request: UpdateProductRequest,
        context: AuditContext,
    ) -> Result<Product, InventoryError> {
        let current = self.get(id).await?;
        let has_lotes = current.lotes.as_ref().is_some_and(|lotes| !lotes.is_empty());

        let mut patch = ProductPatch::default();

        if let Some(name) = request.name {
            let name = validate_name(&name)?;
            if name != current.name {
                patch.name = Some(name);
            }
        }
        if let Some(unit) = request.unit {
            let unit = parse_unit(&unit)?;
            if unit != current.unit {
                patch.unit = Some(unit);
            }
        }
        if let Some(quantity) = request.quantity {
            let quantity = validate_quantity(quantity)?;
            if quantity != current.quantity {
                if has_lotes {
                    return Err(InventoryError::Validation(QUANTITY_IS_DERIVED.to_owned()));
                }
                patch.quantity = Some(quantity);
            }
        }

        if patch.is_empty() {
            return Ok(current);
        }

        let update = self
            .products
            .update_product(id, &patch)
            .await?
            .ok_or(InventoryError::ProductNotFound)?;
        let (before, after) = (update.before, update.after);
        let fields = changed_fields(&before, &after);

        tracing::info!(fields = fields.len(), "Product updated");

        let mut change = ProductChange::new(ChangeAction::Updated);
        change.product_id = Some(after.id.clone());
        change.product_name = Some(after.name.clone());
        if before.quantity != after.quantity {
            change.quantity_before = Some(before.quantity);
            change.quantity_after = Some(after.quantity);
        }
        change.changed_fields = Some(fields);

        audit(
            &self.history,
            "product.update",
            vec![
                NewHistoryRecord::new(after.id.as_str(), ChangePayload::Product(change)),
                context_entry(&after.id, &after.name, before.quantity, after.quantity),
            ],
            context,
        )
        .await;

        Ok(after)
    }

    /// Delete a product together with its lotes.
    ///
    /// Returns the product as it was just before deletion.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::ProductNotFound` if it does not exist.
    #[instrument(skip(self, context), fields(product_id = %id))]
    pub async fn delete(
        &self,
        id: &ProductId,
        context: AuditContext,
    ) -> Result<Product, InventoryError> {
        let removal = self
            .products
            .delete_product(id)
            .await?
            .ok_or(InventoryError::ProductNotFound)?;
        let product = removal.product;

        tracing::info!(lotes = removal.lote_count, "Product deleted");

        let mut change = ProductChange::new(ChangeAction::Deleted);
        change.product_id = Some(product.id.clone());
        change.product_name = Some(product.name.clone());
        change.quantity_before = Some(product.quantity);
        change.is_product_removal = true;
        if removal.lote_count > 0 {
            change.changed_fields = Some(vec![ChangedField::new(
                "lotes",
                removal.lote_count,
                Value::from(0),
            )]);
        }

        audit(
            &self.history,
            "product.delete",
            vec![
                NewHistoryRecord::new(product.id.as_str(), ChangePayload::Product(change)),
                context_entry(&product.id, &product.name, product.quantity, Decimal::ZERO),
            ],
            context,
        )
        .await;

        Ok(product)
    }
}
