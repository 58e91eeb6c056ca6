//! Lote CRUD. Each write moves the owning product's derived quantity.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;

use estoque_core::{
    ChangeAction, ChangePayload, LoteChangeDetail, Lote, LoteId, NewHistoryRecord,
    ProductId, parse_expiry_date,
};

use super::{InventoryError, audit, context_entry, require_positive};
use crate::db::LoteStore;
use crate::models::{LoteMutation, LotePatch, NewLote};
use crate::services::history::{AuditContext, HistoryService};

/// Body of `POST /products/{id}/lotes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoteRequest {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity: Option<Decimal>,
    /// `YYYY-MM-DD`.
    #[serde(default, alias = "dataValidade")]
    pub expiry_date: Option<String>,
}

/// Body of `PUT /lotes/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLoteRequest {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity: Option<Decimal>,
    #[serde(default, alias = "dataValidade")]
    pub expiry_date: Option<String>,
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate, InventoryError> {
    parse_expiry_date(raw).map_err(|e| InventoryError::Validation(e.to_string()))
}

/// Lote service.
#[derive(Clone)]
pub struct LoteService {
    lotes: Arc<dyn LoteStore>,
    history: HistoryService,
}

impl LoteService {
    /// Create a new lote service.
    #[must_use]
    pub fn new(lotes: Arc<dyn LoteStore>, history: HistoryService) -> Self {
        Self { lotes, history }
    }

    /// Lotes of a product, earliest expiry first.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::ProductNotFound` if the product does not
    /// exist.
    pub async fn list_for_product(&self, product_id: &ProductId) -> Result<Vec<Lote>, InventoryError> {
        self.lotes
            .list_lotes(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound)
    }

    /// # Errors
    ///
    /// Returns `InventoryError::LoteNotFound` if it does not exist.
    pub async fn get(&self, id: LoteId) -> Result<Lote, InventoryError> {
        self.lotes
            .get_lote(id)
            .await?
            .ok_or(InventoryError::LoteNotFound)
    }

    /// Add a lote to a product.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` for a non-positive quantity or a
    /// bad date, and `InventoryError::ProductNotFound` for an unknown product.
    /// A quantity that would push the product total past the column range is
    /// also a `Validation` error.
    #[instrument(skip(self, request, context), fields(product_id = %product_id))]
    pub async fn create(
        &self,
        product_id: &ProductId,
        request: CreateLoteRequest,
        context: AuditContext,
    ) -> Result<Lote, InventoryError> {
        let quantity = require_positive(request.quantity.unwrap_or_default())?;
        let expiry_date = parse_date(request.expiry_date.as_deref().unwrap_or_default())?;

        let mutation = self
            .lotes
            .insert_lote(&NewLote {
                product_id: product_id.clone(),
                quantity,
                expiry_date,
            })
            .await?
            .ok_or(InventoryError::ProductNotFound)?;

        tracing::info!(
            lote_id = %mutation.lote.id,
            product_quantity = %mutation.product.quantity_after,
            "Lote created"
        );

        let lote = &mutation.lote;
        let mut change =
            LoteChangeDetail::new(ChangeAction::Created, lote.id, lote.product_id.clone());
        change.quantity_after = Some(lote.quantity);
        change.expiry_date = Some(lote.expiry_date);

        self.audit("lote.create", &mutation, change, context).await;
        Ok(mutation.lote)
    }

    /// Change a lote's quantity and/or expiry date.
    ///
    /// Fields equal to the stored values are dropped; a request left with
    /// nothing to change returns the lote untouched and records no history.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` for a non-positive quantity or a
    /// bad date, and `InventoryError::LoteNotFound` for an unknown lote.
    #[instrument(skip(self, request, context), fields(lote_id = %id))]
    pub async fn update(
        &self,
        id: LoteId,
        request: UpdateLoteRequest,
        context: AuditContext,
    ) -> Result<Lote, InventoryError> {
        let quantity = request.quantity.map(require_positive).transpose()?;
        let expiry_date = request.expiry_date.as_deref().map(parse_date).transpose()?;

        let current = self.get(id).await?;
        let patch = LotePatch {
            quantity: quantity.filter(|q| *q != current.quantity),
            expiry_date: expiry_date.filter(|d| *d != current.expiry_date),
        };

        if patch.quantity.is_none() && patch.expiry_date.is_none() {
            return Ok(current);
        }

        let mutation = self
            .lotes
            .update_lote(id, &patch)
            .await?
            .ok_or(InventoryError::LoteNotFound)?;

        let lote = &mutation.lote;
        let previous = mutation.previous.as_ref().unwrap_or(lote);

        tracing::info!(
            product_quantity = %mutation.product.quantity_after,
            "Lote updated"
        );

        let mut change =
            LoteChangeDetail::new(ChangeAction::Updated, lote.id, lote.product_id.clone());
        change.quantity_before = Some(previous.quantity);
        change.quantity_after = Some(lote.quantity);
        if lote.quantity != previous.quantity {
            change.quantity_changed = Some(lote.quantity - previous.quantity);
        }
        change.expiry_date_old = Some(previous.expiry_date);
        change.expiry_date_new = Some(lote.expiry_date);

        self.audit("lote.update", &mutation, change, context).await;
        Ok(mutation.lote)
    }

    /// Remove a lote. Returns the lote as it was.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::LoteNotFound` for an unknown lote.
    #[instrument(skip(self, context), fields(lote_id = %id))]
    pub async fn delete(&self, id: LoteId, context: AuditContext) -> Result<Lote, InventoryError> {
        let mutation = self
            .lotes
            .delete_lote(id)
            .await?
            .ok_or(InventoryError::LoteNotFound)?;

        tracing::info!(
            product_quantity = %mutation.product.quantity_after,
            "Lote deleted"
        );

        let lote = &mutation.lote;
        let mut change =
            LoteChangeDetail::new(ChangeAction::Deleted, lote.id, lote.product_id.clone());
        change.quantity_before = Some(lote.quantity);
        change.expiry_date = Some(lote.expiry_date);

        self.audit("lote.delete", &mutation, change, context).await;
        Ok(mutation.lote)
    }

    async fn audit(
        &self,
        operation: &'static str,
        mutation: &LoteMutation,
        change: LoteChangeDetail,
        context: AuditContext,
    ) {
        let totals = &mutation.product;
        audit(
            &self.history,
            operation,
            vec![
                NewHistoryRecord::new(mutation.lote.id.to_string(), ChangePayload::Lote(change)),
                context_entry(
                    &totals.id,
                    &totals.name,
                    totals.quantity_before,
                    totals.quantity_after,
                ),
            ],
            context,
        )
        .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::{HistoryStore, ProductStore};
    use crate::models::{NewProduct, max_quantity};
    use estoque_core::{BatchId, EntityType, Unit, UserId};

    fn setup() -> (Arc<MemoryStore>, LoteService) {
        let store = Arc::new(MemoryStore::new());
        let history = HistoryService::new(store.clone());
        (store.clone(), LoteService::new(store, history))
    }

    async fn add_product(store: &MemoryStore, id: &str) {
        store
            .insert_product(&NewProduct {
                id: ProductId::new(id),
                name: "Curbix".to_owned(),
                unit: Unit::Liter,
                quantity: Decimal::ZERO,
            })
            .await
            .unwrap();
    }

    fn create(quantity: i64, date: &str) -> CreateLoteRequest {
        CreateLoteRequest {
            quantity: Some(Decimal::from(quantity)),
            expiry_date: Some(date.to_owned()),
        }
    }

    async fn product_quantity(store: &MemoryStore, id: &str) -> Decimal {
        store
            .get_product(&ProductId::new(id))
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    #[tokio::test]
    async fn test_create_records_lote_and_context() {
        let (store, service) = setup();
        add_product(&store, "P1").await;

        let lote = service
            .create(
                &ProductId::new("P1"),
                create(10, "2025-01-01"),
                AuditContext::in_batch(BatchId::new("B1")),
            )
            .await
            .unwrap();

        assert_eq!(product_quantity(&store, "P1").await, Decimal::from(10));

        let records = store.find_by_batch(&BatchId::new("B1")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity_type(), EntityType::Lote);
        assert_eq!(records[0].entity_id, lote.id.to_string());
        let ChangePayload::ProductBatchContext(context) = &records[1].payload else {
            panic!("expected context payload");
        };
        assert_eq!(context.product_name, "Curbix");
        assert_eq!(context.quantity_before_batch, Decimal::ZERO);
        assert_eq!(context.quantity_after_batch, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_create_validates_before_writing() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let product = ProductId::new("P1");

        for request in [
            create(0, "2025-01-01"),
            create(-3, "2025-01-01"),
            create(5, "2025-13-01"),
            CreateLoteRequest::default(),
        ] {
            let err = service.create(&product, request, AuditContext::default()).await.unwrap_err();
            assert!(matches!(err, InventoryError::Validation(_)));
        }
        assert!(service.list_for_product(&product).await.unwrap().is_empty());
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn test_create_under_missing_product() {
        let (_, service) = setup();

        let err = service
            .create(&ProductId::new("ghost"), create(1, "2025-01-01"), AuditContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::ProductNotFound));
    }

    #[tokio::test]
    async fn test_update_quantity_records_delta() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let lote = service
            .create(&ProductId::new("P1"), create(10, "2025-01-01"), AuditContext::default())
            .await
            .unwrap();

        service
            .update(
                lote.id,
                UpdateLoteRequest {
                    quantity: Some(Decimal::from(4)),
                    expiry_date: None,
                },
                AuditContext::in_batch(BatchId::new("B2")),
            )
            .await
            .unwrap();

        assert_eq!(product_quantity(&store, "P1").await, Decimal::from(4));
        let records = store.find_by_batch(&BatchId::new("B2")).await.unwrap();
        let ChangePayload::Lote(change) = &records[0].payload else {
            panic!("expected lote payload");
        };
        assert_eq!(change.quantity_before, Some(Decimal::from(10)));
        assert_eq!(change.quantity_after, Some(Decimal::from(4)));
        assert_eq!(change.quantity_changed, Some(Decimal::from(-6)));
    }

    #[tokio::test]
    async fn test_update_date_only_has_no_delta() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let lote = service
            .create(&ProductId::new("P1"), create(10, "2025-01-01"), AuditContext::default())
            .await
            .unwrap();

        let updated = service
            .update(
                lote.id,
                UpdateLoteRequest {
                    quantity: None,
                    expiry_date: Some("2026-06-30".to_owned()),
                },
                AuditContext::in_batch(BatchId::new("B2")),
            )
            .await
            .unwrap();

        assert_eq!(updated.quantity, Decimal::from(10));
        let records = store.find_by_batch(&BatchId::new("B2")).await.unwrap();
        let ChangePayload::Lote(change) = &records[0].payload else {
            panic!("expected lote payload");
        };
        assert_eq!(change.quantity_changed, AuditContext::default());
        assert_eq!(change.expiry_date_new, Some(updated.expiry_date));
        assert_ne!(change.expiry_date_old, change.expiry_date_new);
    }

    #[tokio::test]
    async fn test_update_with_stored_values_records_nothing() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let lote = service
            .create(&ProductId::new("P1"), create(10, "2025-01-01"), AuditContext::default())
            .await
            .unwrap();
        let before = store.history_len();

        let unchanged = service
            .update(
                lote.id,
                UpdateLoteRequest {
                    quantity: Some(Decimal::new(10_000, 3)),
                    expiry_date: Some("2025-01-01".to_owned()),
                },
                AuditContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(unchanged, lote);
        assert_eq!(store.history_len(), before);
    }

    #[tokio::test]
    async fn test_product_total_must_fit_the_column() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let product = ProductId::new("P1");
        service
            .create(
                &product,
                CreateLoteRequest {
                    quantity: Some(max_quantity()),
                    expiry_date: Some("2025-01-01".to_owned()),
                },
                AuditContext::default(),
            )
            .await
            .unwrap();

        let err = service
            .create(&product, create(1, "2025-02-01"), AuditContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::Validation(_)));
        assert_eq!(product_quantity(&store, "P1").await, max_quantity());
        assert_eq!(service.list_for_product(&product).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sub_milli_lote_quantity_is_rejected() {
        let (store, service) = setup();
        add_product(&store, "P1").await;

        let err = service
            .create(
                &ProductId::new("P1"),
                CreateLoteRequest {
                    quantity: Some(Decimal::new(4, 4)),
                    expiry_date: Some("2025-01-01".to_owned()),
                },
                AuditContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::Validation(_)));
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn test_lote_writes_record_the_actor() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let actor = UserId::new(11);

        let lote = service
            .create(
                &ProductId::new("P1"),
                create(3, "2025-01-01"),
                AuditContext::new(actor, Some(BatchId::new("B5"))),
            )
            .await
            .unwrap();
        service
            .delete(lote.id, AuditContext::new(actor, Some(BatchId::new("B6"))))
            .await
            .unwrap();

        for batch in ["B5", "B6"] {
            let records = store.find_by_batch(&BatchId::new(batch)).await.unwrap();
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| r.user_id == Some(actor)));
        }
    }

    #[tokio::test]
    async fn test_delete_lowers_product_quantity() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let product = ProductId::new("P1");
        let first = service
            .create(&product, create(10, "2025-01-01"), AuditContext::default())
            .await
            .unwrap();
        service
            .create(&product, create(5, "2025-02-01"), AuditContext::default())
            .await
            .unwrap();

        service.delete(first.id, AuditContext::default()).await.unwrap();

        assert_eq!(product_quantity(&store, "P1").await, Decimal::from(5));
        assert!(matches!(
            service.delete(first.id, AuditContext::default()).await,
            Err(InventoryError::LoteNotFound)
        ));
    }

    #[tokio::test]
    async fn test_shared_batch_merges_into_one_group() {
        let (store, service) = setup();
        add_product(&store, "P1").await;
        let product = ProductId::new("P1");
        let batch = BatchId::new("screen-save");

        service
            .create(&product, create(10, "2025-01-01"), AuditContext::in_batch(batch.clone()))
            .await
            .unwrap();
        service
            .create(&product, create(5, "2025-02-01"), AuditContext::in_batch(batch.clone()))
            .await
            .unwrap();

        let page = HistoryService::new(store.clone())
            .grouped_history(1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_batches, 1);
        let summary = &page.groups[0].product_summaries[&product];
        assert_eq!(summary.total_quantity_before_batch, Decimal::ZERO);
        assert_eq!(summary.total_quantity_after_batch, Decimal::from(15));
    }
}
