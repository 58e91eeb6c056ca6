//! Audit history service.
//!
//! Turns domain changes into persisted [`HistoryRecord`]s and projects stored
//! records back into paginated, batch-grouped views.
//!
//! Mutation services call [`HistoryService::record_operation`] after their
//! own transaction has committed and only log a failure, so the audit trail
//! is at-most-once: a crash between the two leaves the mutation unaudited.

mod error;
pub mod grouping;

pub use error::HistoryError;

use std::sync::Arc;

use tracing::instrument;

use estoque_core::{
    BatchId, ChangePayload, EntityType, HistoryRecord, NewHistoryRecord,
    PaginatedHistoryBatchGroups, ProductBatchContextChangeDetail, UserId,
};

use crate::db::HistoryStore;

/// Largest page the list endpoints will serve.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Who is acting and which operation batch the resulting records join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub user_id: Option<UserId>,
    pub batch_id: Option<BatchId>,
}

impl AuditContext {
    /// Changes made by `user_id`, optionally inside a client batch.
    #[must_use]
    pub const fn new(user_id: UserId, batch_id: Option<BatchId>) -> Self {
        Self {
            user_id: Some(user_id),
            batch_id,
        }
    }

    /// Unattributed changes inside `batch_id`.
    #[must_use]
    pub const fn in_batch(batch_id: BatchId) -> Self {
        Self {
            user_id: None,
            batch_id: Some(batch_id),
        }
    }
}

/// History service over an injected [`HistoryStore`].
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
}

impl HistoryService {
    /// Create a new history service.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Record a single change.
    ///
    /// Without a batch id the record forms a batch of its own (its batch id
    /// is its own id).
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if the write fails.
    pub async fn record_change(
        &self,
        entity_id: impl Into<String> + Send,
        payload: ChangePayload,
        audit: AuditContext,
    ) -> Result<HistoryRecord, HistoryError> {
        let mut record = NewHistoryRecord::new(entity_id, payload).by(audit.user_id);
        record.batch_id = audit.batch_id;
        Ok(self.store.insert_one(record).await?)
    }

    /// Record every entry of one mutation atomically under one batch id.
    ///
    /// Uses the context's batch id when given, otherwise a fresh id shared by
    /// all entries. Any batch id or actor already set on an entry is
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if the write fails, in which case
    /// none of the entries were stored.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn record_operation(
        &self,
        entries: Vec<NewHistoryRecord>,
        audit: AuditContext,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let batch_id = audit
            .batch_id
            .filter(|batch| !batch.is_blank())
            .unwrap_or_else(BatchId::generate);
        let entries = entries
            .into_iter()
            .map(|entry| entry.in_batch(batch_id.clone()).by(audit.user_id))
            .collect();

        Ok(self.store.insert_many(entries).await?)
    }

    /// Store client-supplied entries under one freshly generated batch id,
    /// attributed to `actor`.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::EmptyBatch` for an empty list (nothing is
    /// written), or `HistoryError::Repository` if the atomic write fails.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn create_batch(
        &self,
        entries: Vec<NewHistoryRecord>,
        actor: Option<UserId>,
    ) -> Result<(BatchId, Vec<HistoryRecord>), HistoryError> {
        if entries.is_empty() {
            return Err(HistoryError::EmptyBatch);
        }
        for entry in &entries {
            validate_entry(entry)?;
        }

        let batch_id = BatchId::generate();
        let entries = entries
            .into_iter()
            .map(|entry| entry.in_batch(batch_id.clone()).by(actor))
            .collect();
        let records = self.store.insert_many(entries).await?;

        tracing::info!(batch_id = %batch_id, count = records.len(), "History batch created");
        Ok((batch_id, records))
    }

    /// Store one client-supplied entry, applying defaults and attributing it
    /// to `actor`.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Validation` for a blank entity id,
    /// `HistoryError::Conflict` when the client-chosen id is taken, or
    /// `HistoryError::Repository` if the write fails.
    pub async fn create_entry(
        &self,
        entry: NewHistoryRecord,
        actor: Option<UserId>,
    ) -> Result<HistoryRecord, HistoryError> {
        validate_entry(&entry)?;
        Ok(self.store.insert_one(entry.by(actor)).await?)
    }

    /// Record a product's before/after snapshot for an operation batch.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Validation` for a blank batch or product id, or
    /// `HistoryError::Repository` if the write fails.
    pub async fn record_product_context(
        &self,
        batch_id: BatchId,
        detail: ProductBatchContextChangeDetail,
        actor: Option<UserId>,
    ) -> Result<HistoryRecord, HistoryError> {
        if batch_id.is_blank() {
            return Err(HistoryError::Validation(
                "X-Operation-Batch-ID header is required".to_owned(),
            ));
        }
        if detail.product_id.is_blank() {
            return Err(HistoryError::Validation(
                "productId is required in payload".to_owned(),
            ));
        }

        let entity_id = detail.product_id.as_str().to_owned();
        self.record_change(
            entity_id,
            ChangePayload::ProductBatchContext(detail),
            AuditContext {
                user_id: actor,
                batch_id: Some(batch_id),
            },
        )
        .await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if the query fails.
    pub async fn history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>, HistoryError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.store.list_recent(limit, offset).await?)
    }

    /// Records for one entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if the query fails.
    pub async fn history_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.store.find_by_entity(entity_type, entity_id).await?)
    }

    /// Records of one batch, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if the query fails.
    pub async fn by_batch(&self, batch_id: &BatchId) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.store.find_by_batch(batch_id).await?)
    }

    /// One page of batch groups, most recent batch first.
    ///
    /// `page` is 1-based; `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Repository` if any query fails, including a
    /// stored record that no longer decodes.
    #[instrument(skip(self))]
    pub async fn grouped_history(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<PaginatedHistoryBatchGroups, HistoryError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let batch_page = self.store.list_distinct_batches(page, page_size).await?;

        let mut groups = Vec::with_capacity(batch_page.batches.len());
        for batch in batch_page.batches {
            let records = self.store.find_by_batch(&batch.batch_id).await?;
            groups.push(grouping::build_group(
                batch.batch_id,
                batch.earliest_timestamp,
                records,
            ));
        }

        Ok(PaginatedHistoryBatchGroups {
            groups,
            total_batches: batch_page.total_batches,
            page,
            page_size,
            total_pages: batch_page.total_batches.div_ceil(u64::from(page_size)),
        })
    }
}

fn validate_entry(entry: &NewHistoryRecord) -> Result<(), HistoryError> {
    if entry.entity_id.trim().is_empty() {
        return Err(HistoryError::Validation("entityId is required".to_owned()));
    }
    Ok(())
}
