//! Audit history: change records, their payload variants, and grouped views.
//!
//! A [`HistoryRecord`] is immutable once written. Its `changes` JSON is
//! shaped by `entityType`, so the payload is modelled as the closed
//! [`ChangePayload`] union and decoded by switching on that discriminator.
//!
//! On the wire a record looks like:
//!
//! ```json
//! {
//!   "id": "5b0c…",
//!   "timestamp": "2025-01-01T12:00:00Z",
//!   "entityType": "lote",
//!   "entityId": "9f1e…",
//!   "batchId": "B1",
//!   "changes": { "action": "created", "quantityAfter": 10, … }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::{BatchId, HistoryId, LoteId, ProductId, UserId};

/// Display label used when a record has no product snapshot in its batch.
pub const CONTEXT_UNAVAILABLE: &str = "Context Unavailable";

// =============================================================================
// Discriminators
// =============================================================================

/// Which kind of entity a history record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "history_entity_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Lote,
    /// Per-batch snapshot of a product's aggregate quantity.
    ProductBatchContext,
}

impl EntityType {
    /// The wire/storage name of this entity type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Lote => "lote",
            Self::ProductBatchContext => "product_batch_context",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "lote" => Ok(Self::Lote),
            "product_batch_context" => Ok(Self::ProductBatchContext),
            _ => Err(format!("invalid entity type: {s}")),
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

// =============================================================================
// Payload variants
// =============================================================================

/// One edited field of a product update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedField {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lote_id: Option<LoteId>,
}

impl ChangedField {
    /// Record a field going from `old` to `new`.
    pub fn new(field: impl Into<String>, old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            old_value: old.into(),
            new_value: new.into(),
            lote_id: None,
        }
    }
}

/// Payload of a `product` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductChange {
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity_before: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity_after: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_fields: Option<Vec<ChangedField>>,
    #[serde(default)]
    pub is_new_product: bool,
    #[serde(default)]
    pub is_product_removal: bool,
}

impl ProductChange {
    /// An empty change for `action`; fill the relevant fields afterwards.
    #[must_use]
    pub const fn new(action: ChangeAction) -> Self {
        Self {
            action,
            product_id: None,
            product_name: None,
            quantity_before: None,
            quantity_after: None,
            changed_fields: None,
            is_new_product: false,
            is_product_removal: false,
        }
    }
}

/// Payload of a `lote` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoteChangeDetail {
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lote_id: Option<LoteId>,
    /// Owning product; grouped history resolves display context through it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity_changed: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity_before: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity_after: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date_old: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date_new: Option<NaiveDate>,
}

impl LoteChangeDetail {
    /// An empty change for `action` on the given lote.
    #[must_use]
    pub const fn new(action: ChangeAction, lote_id: LoteId, product_id: ProductId) -> Self {
        Self {
            action,
            lote_id: Some(lote_id),
            product_id: Some(product_id),
            quantity_changed: None,
            quantity_before: None,
            quantity_after: None,
            expiry_date: None,
            expiry_date_old: None,
            expiry_date_new: None,
        }
    }
}

/// Payload of a `product_batch_context` record: the product's aggregate
/// quantity immediately before and after one operation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductBatchContextChangeDetail {
    pub product_id: ProductId,
    #[serde(default, alias = "productNameSnapshot")]
    pub product_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity_before_batch: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity_after_batch: Decimal,
}

/// The `changes` payload of a record, discriminated by [`EntityType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePayload {
    Product(ProductChange),
    Lote(LoteChangeDetail),
    ProductBatchContext(ProductBatchContextChangeDetail),
}

impl ChangePayload {
    /// The discriminator stored alongside this payload.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Product(_) => EntityType::Product,
            Self::Lote(_) => EntityType::Lote,
            Self::ProductBatchContext(_) => EntityType::ProductBatchContext,
        }
    }

    /// Marshal the payload into its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Product(change) => serde_json::to_value(change),
            Self::Lote(change) => serde_json::to_value(change),
            Self::ProductBatchContext(change) => serde_json::to_value(change),
        }
    }

    /// Decode a stored payload, choosing the variant from `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if `changes` does not match the variant's shape.
    pub fn from_parts(entity_type: EntityType, changes: Value) -> Result<Self, serde_json::Error> {
        Ok(match entity_type {
            EntityType::Product => Self::Product(serde_json::from_value(changes)?),
            EntityType::Lote => Self::Lote(serde_json::from_value(changes)?),
            EntityType::ProductBatchContext => {
                Self::ProductBatchContext(serde_json::from_value(changes)?)
            }
        })
    }

    /// The product this payload is about, when it can be told from the
    /// payload alone.
    #[must_use]
    pub const fn product_id(&self) -> Option<&ProductId> {
        match self {
            Self::Product(change) => change.product_id.as_ref(),
            Self::Lote(change) => change.product_id.as_ref(),
            Self::ProductBatchContext(change) => Some(&change.product_id),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordWire", try_from = "RecordWire")]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub timestamp: DateTime<Utc>,
    /// Product id, lote id, or (for context records) the product id.
    pub entity_id: String,
    pub batch_id: BatchId,
    /// Operator whose request produced the record; `None` for writes made
    /// outside an authenticated request (seeding).
    pub user_id: Option<UserId>,
    pub payload: ChangePayload,
}

impl HistoryRecord {
    /// Shortcut for `self.payload.entity_type()`.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    /// The product this record relates to.
    ///
    /// Product and context records are keyed by the product id itself; lote
    /// records carry it in their payload.
    #[must_use]
    pub fn related_product_id(&self) -> Option<ProductId> {
        match &self.payload {
            ChangePayload::Lote(change) => change.product_id.clone(),
            ChangePayload::Product(_) | ChangePayload::ProductBatchContext(_) => {
                Some(ProductId::new(self.entity_id.clone()))
            }
        }
    }
}

/// A record about to be written; unset fields get defaults on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NewRecordWire", try_from = "NewRecordWire")]
pub struct NewHistoryRecord {
    pub id: Option<HistoryId>,
    pub timestamp: Option<DateTime<Utc>>,
    pub entity_id: String,
    pub batch_id: Option<BatchId>,
    pub user_id: Option<UserId>,
    pub payload: ChangePayload,
}

impl NewHistoryRecord {
    /// A record for `entity_id` with every default left unset.
    pub fn new(entity_id: impl Into<String>, payload: ChangePayload) -> Self {
        Self {
            id: None,
            timestamp: None,
            entity_id: entity_id.into(),
            batch_id: None,
            user_id: None,
            payload,
        }
    }

    /// Attribute the record to an operator.
    #[must_use]
    pub fn by(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Tag the record with an operation batch.
    #[must_use]
    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Fill defaults: a fresh id, the current time, and a batch id equal to
    /// the record's own id when none was supplied.
    #[must_use]
    pub fn into_record(self) -> HistoryRecord {
        let id = self.id.unwrap_or_else(HistoryId::generate);
        HistoryRecord {
            id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            entity_id: self.entity_id,
            batch_id: self
                .batch_id
                .filter(|batch| !batch.is_blank())
                .unwrap_or_else(|| BatchId::from(id)),
            user_id: self.user_id,
            payload: self.payload,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    id: HistoryId,
    #[serde(alias = "date")]
    timestamp: DateTime<Utc>,
    entity_type: EntityType,
    entity_id: String,
    batch_id: BatchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    changes: Value,
}

impl From<HistoryRecord> for RecordWire {
    fn from(record: HistoryRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
            entity_type: record.payload.entity_type(),
            entity_id: record.entity_id,
            batch_id: record.batch_id,
            user_id: record.user_id,
            changes: record.payload.to_json().unwrap_or(Value::Null),
        }
    }
}

impl TryFrom<RecordWire> for HistoryRecord {
    type Error = serde_json::Error;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        Ok(Self {
            id: wire.id,
            timestamp: wire.timestamp,
            entity_id: wire.entity_id,
            batch_id: wire.batch_id,
            user_id: wire.user_id,
            payload: ChangePayload::from_parts(wire.entity_type, wire.changes)?,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewRecordWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<HistoryId>,
    #[serde(default, alias = "date", skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    entity_type: EntityType,
    entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_id: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    changes: Value,
}

impl From<NewHistoryRecord> for NewRecordWire {
    fn from(record: NewHistoryRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
            entity_type: record.payload.entity_type(),
            entity_id: record.entity_id,
            batch_id: record.batch_id,
            user_id: record.user_id,
            changes: record.payload.to_json().unwrap_or(Value::Null),
        }
    }
}

impl TryFrom<NewRecordWire> for NewHistoryRecord {
    type Error = serde_json::Error;

    fn try_from(wire: NewRecordWire) -> Result<Self, Self::Error> {
        Ok(Self {
            id: wire.id,
            timestamp: wire.timestamp,
            entity_id: wire.entity_id,
            batch_id: wire.batch_id,
            user_id: wire.user_id,
            payload: ChangePayload::from_parts(wire.entity_type, wire.changes)?,
        })
    }
}

// =============================================================================
// Grouped views (derived, never stored)
// =============================================================================

/// Display context attached to a record in grouped history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "status",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum ProductContext {
    /// A batch snapshot exists for the record's product.
    Available {
        product_id: ProductId,
        product_name: String,
        #[serde(with = "rust_decimal::serde::float")]
        product_current_total_quantity: Decimal,
    },
    /// No snapshot in this batch (legacy data or a missed write).
    Unavailable,
}

impl ProductContext {
    /// Product name to show, or [`CONTEXT_UNAVAILABLE`].
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Available { product_name, .. } => product_name,
            Self::Unavailable => CONTEXT_UNAVAILABLE,
        }
    }
}

/// A record as shown inside a [`HistoryBatchGroup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecordView {
    #[serde(flatten)]
    pub record: HistoryRecord,
    pub product_context: ProductContext,
}

/// Net effect of one batch on one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductBatchSummary {
    pub product_id: ProductId,
    pub product_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_quantity_before_batch: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_quantity_after_batch: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_quantity_change_in_batch: Decimal,
}

/// All records of one operation batch, oldest first, with summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBatchGroup {
    pub batch_id: BatchId,
    /// Timestamp of the earliest record in the batch.
    pub created_at: DateTime<Utc>,
    pub records: Vec<HistoryRecordView>,
    pub record_count: usize,
    pub product_summaries: BTreeMap<ProductId, ProductBatchSummary>,
}

/// One page of batch groups, newest batch first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedHistoryBatchGroups {
    pub groups: Vec<HistoryBatchGroup>,
    pub total_batches: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}
