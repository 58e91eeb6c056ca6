//! In-memory implementation of every store trait.
//!
//! Compiled for unit tests and behind the `test-helpers` feature so the
//! integration tests can run the full router without `PostgreSQL`. It keeps
//! the same ordering and atomicity rules as the `PostgreSQL` stores, and can
//! be told to fail history writes to exercise rollback paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use estoque_core::{
    BatchId, EntityType, HistoryRecord, Lote, LoteId, NewHistoryRecord, Product, ProductId,
    UserId,
};

use super::{
    BatchPage, BatchRef, HistoryStore, LoteStore, ProductStore, RepositoryError, UserStore,
};
use crate::models::{
    LoteMutation, LotePatch, NewLote, NewProduct, ProductPatch, ProductRemoval, ProductTotals,
    ProductUpdate, User, UserCredentials, max_quantity,
};

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    lotes: BTreeMap<LoteId, Lote>,
    /// Append-only; the index doubles as the insertion sequence.
    history: Vec<HistoryRecord>,
    users: Vec<UserCredentials>,
    /// Remaining history record writes before failures start.
    history_write_budget: Option<usize>,
    unreachable: bool,
}

impl State {
    fn lotes_of(&self, product_id: &ProductId) -> Vec<Lote> {
        let mut lotes: Vec<Lote> = self
            .lotes
            .values()
            .filter(|lote| &lote.product_id == product_id)
            .cloned()
            .collect();
        lotes.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        lotes
    }

    fn with_lotes(&self, product: &Product) -> Product {
        Product {
            lotes: Some(self.lotes_of(&product.id)),
            ..product.clone()
        }
    }

    fn recompute_quantity(&mut self, product_id: &ProductId, now: DateTime<Utc>) -> Decimal {
        let total: Decimal = self
            .lotes
            .values()
            .filter(|lote| &lote.product_id == product_id)
            .map(|lote| lote.quantity)
            .sum();
        if let Some(product) = self.products.get_mut(product_id) {
            product.quantity = total;
            product.updated_at = now;
        }
        total
    }

    /// Fail unless the product's lotes, with `replacing` swapped for
    /// `quantity`, still fit the quantity column.
    fn ensure_total_fits(
        &self,
        product_id: &ProductId,
        replacing: Option<LoteId>,
        quantity: Decimal,
    ) -> Result<(), RepositoryError> {
        let others: Decimal = self
            .lotes
            .values()
            .filter(|lote| &lote.product_id == product_id && Some(lote.id) != replacing)
            .map(|lote| lote.quantity)
            .sum();
        if others + quantity > max_quantity() {
            return Err(RepositoryError::Invalid(super::TOTAL_OUT_OF_RANGE.to_owned()));
        }
        Ok(())
    }

    fn totals(&self, product_id: &ProductId, before: Decimal, after: Decimal) -> ProductTotals {
        ProductTotals {
            id: product_id.clone(),
            name: self
                .products
                .get(product_id)
                .map(|product| product.name.clone())
                .unwrap_or_default(),
            quantity_before: before,
            quantity_after: after,
        }
    }

    fn take_history_write(&mut self) -> Result<(), RepositoryError> {
        match self.history_write_budget.as_mut() {
            Some(0) => Err(RepositoryError::Database(sqlx::Error::Protocol(
                "induced history write failure".to_owned(),
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn ensure_unique_id(&self, record: &HistoryRecord) -> Result<(), RepositoryError> {
        if self.history.iter().any(|existing| existing.id == record.id) {
            return Err(RepositoryError::Conflict(
                "history record id already exists".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every history write fail from now on.
    pub fn fail_history_writes(&self) {
        self.state().history_write_budget = Some(0);
    }

    /// Allow `n` more history record writes, then fail.
    pub fn fail_history_writes_after(&self, n: usize) {
        self.state().history_write_budget = Some(n);
    }

    /// Stop inducing history write failures.
    pub fn restore_history_writes(&self) {
        self.state().history_write_budget = None;
    }

    /// Make the readiness ping fail (or succeed again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Number of history records persisted so far.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Insert a user directly (tests provision users without the CLI).
    pub fn add_user(&self, username: &str, password_hash: &str) -> User {
        let mut state = self.state();
        let id = i32::try_from(state.users.len() + 1).unwrap_or(i32::MAX);
        let user = User {
            id: UserId::new(id),
            username: username.to_owned(),
        };
        state.users.push(UserCredentials {
            user: user.clone(),
            password_hash: password_hash.to_owned(),
        });
        user
    }
}

// =============================================================================
// History
// =============================================================================

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_one(&self, record: NewHistoryRecord) -> Result<HistoryRecord, RepositoryError> {
        let mut state = self.state();
        state.take_history_write()?;
        let record = record.into_record();
        state.ensure_unique_id(&record)?;
        state.history.push(record.clone());
        Ok(record)
    }

    async fn insert_many(
        &self,
        records: Vec<NewHistoryRecord>,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let mut state = self.state();

        // Stage everything first so a failure leaves nothing behind.
        let mut staged: Vec<HistoryRecord> = Vec::with_capacity(records.len());
        for record in records {
            state.take_history_write()?;
            let record = record.into_record();
            state.ensure_unique_id(&record)?;
            if staged.iter().any(|other| other.id == record.id) {
                return Err(RepositoryError::Conflict(
                    "history record id already exists".to_owned(),
                ));
            }
            staged.push(record);
        }

        state.history.extend(staged.iter().cloned());
        Ok(staged)
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let state = self.state();
        let mut found: Vec<(usize, &HistoryRecord)> = state
            .history
            .iter()
            .enumerate()
            .filter(|(_, r)| r.entity_type() == entity_type && r.entity_id == entity_id)
            .collect();
        found.sort_by(|(sa, a), (sb, b)| b.timestamp.cmp(&a.timestamp).then(sb.cmp(sa)));
        Ok(found.into_iter().map(|(_, r)| r.clone()).collect())
    }

    async fn find_by_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let state = self.state();
        let mut found: Vec<(usize, &HistoryRecord)> = state
            .history
            .iter()
            .enumerate()
            .filter(|(_, r)| &r.batch_id == batch_id)
            .collect();
        found.sort_by(|(sa, a), (sb, b)| a.timestamp.cmp(&b.timestamp).then(sa.cmp(sb)));
        Ok(found.into_iter().map(|(_, r)| r.clone()).collect())
    }

    async fn list_recent(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let state = self.state();
        let mut all: Vec<(usize, &HistoryRecord)> = state.history.iter().enumerate().collect();
        all.sort_by(|(sa, a), (sb, b)| b.timestamp.cmp(&a.timestamp).then(sb.cmp(sa)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn list_distinct_batches(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<BatchPage, RepositoryError> {
        let state = self.state();

        let mut earliest: HashMap<&BatchId, DateTime<Utc>> = HashMap::new();
        for record in &state.history {
            earliest
                .entry(&record.batch_id)
                .and_modify(|ts| *ts = (*ts).min(record.timestamp))
                .or_insert(record.timestamp);
        }

        let mut batches: Vec<BatchRef> = earliest
            .into_iter()
            .map(|(batch_id, earliest_timestamp)| BatchRef {
                batch_id: batch_id.clone(),
                earliest_timestamp,
            })
            .collect();
        batches.sort_by(|a, b| {
            b.earliest_timestamp
                .cmp(&a.earliest_timestamp)
                .then_with(|| b.batch_id.cmp(&a.batch_id))
        });

        let total_batches = batches.len() as u64;
        let skip = page.saturating_sub(1) as usize * page_size as usize;
        Ok(BatchPage {
            batches: batches
                .into_iter()
                .skip(skip)
                .take(page_size as usize)
                .collect(),
            total_batches,
        })
    }
}

// =============================================================================
// Products
// =============================================================================

#[async_trait]
impl ProductStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.state().unreachable {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state();
        let mut products: Vec<Product> = state
            .products
            .values()
            .map(|product| state.with_lotes(product))
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let state = self.state();
        Ok(state.products.get(id).map(|product| state.with_lotes(product)))
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let mut state = self.state();
        if state.products.contains_key(&product.id) {
            return Err(RepositoryError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }

        let now = Utc::now();
        let stored = Product {
            id: product.id.clone(),
            name: product.name.clone(),
            unit: product.unit,
            quantity: product.quantity,
            lotes: None,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(stored.id.clone(), stored.clone());

        Ok(Product {
            lotes: Some(Vec::new()),
            ..stored
        })
    }

    async fn update_product(
        &self,
        id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<ProductUpdate>, RepositoryError> {
        let mut state = self.state();
        let has_lotes = state.lotes.values().any(|lote| &lote.product_id == id);

        if !state.products.contains_key(id) {
            return Ok(None);
        }
        if patch.quantity.is_some() && has_lotes {
            return Err(RepositoryError::Invalid(super::QUANTITY_IS_DERIVED.to_owned()));
        }
        let Some(product) = state.products.get_mut(id) else {
            return Ok(None);
        };
        let before = product.clone();

        if let Some(name) = &patch.name {
            product.name.clone_from(name);
        }
        if let Some(unit) = patch.unit {
            product.unit = unit;
        }
        if let Some(quantity) = patch.quantity {
            product.quantity = quantity;
        }
        product.updated_at = Utc::now();
        let after = product.clone();

        Ok(Some(ProductUpdate {
            before: state.with_lotes(&before),
            after: state.with_lotes(&after),
        }))
    }

    async fn delete_product(
        &self,
        id: &ProductId,
    ) -> Result<Option<ProductRemoval>, RepositoryError> {
        let mut state = self.state();
        let Some(product) = state.products.remove(id) else {
            return Ok(None);
        };

        let lotes = state.lotes_of(id);
        state.lotes.retain(|_, lote| &lote.product_id != id);

        Ok(Some(ProductRemoval {
            lote_count: lotes.len() as u64,
            product: Product {
                lotes: Some(lotes),
                ..product
            },
        }))
    }
}

// =============================================================================
// Lotes
// =============================================================================

#[async_trait]
impl LoteStore for MemoryStore {
    async fn list_lotes(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Vec<Lote>>, RepositoryError> {
        let state = self.state();
        if !state.products.contains_key(product_id) {
            return Ok(None);
        }
        Ok(Some(state.lotes_of(product_id)))
    }

    async fn get_lote(&self, id: LoteId) -> Result<Option<Lote>, RepositoryError> {
        Ok(self.state().lotes.get(&id).cloned())
    }

    async fn insert_lote(&self, lote: &NewLote) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut state = self.state();
        let Some(before) = state.products.get(&lote.product_id).map(|p| p.quantity) else {
            return Ok(None);
        };
        state.ensure_total_fits(&lote.product_id, None, lote.quantity)?;

        let now = Utc::now();
        let stored = Lote {
            id: LoteId::generate(),
            product_id: lote.product_id.clone(),
            quantity: lote.quantity,
            expiry_date: lote.expiry_date,
            created_at: now,
            updated_at: now,
        };
        state.lotes.insert(stored.id, stored.clone());
        let after = state.recompute_quantity(&lote.product_id, now);

        Ok(Some(LoteMutation {
            product: state.totals(&lote.product_id, before, after),
            lote: stored,
            previous: None,
        }))
    }

    async fn update_lote(
        &self,
        id: LoteId,
        patch: &LotePatch,
    ) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut state = self.state();
        let Some(previous) = state.lotes.get(&id).cloned() else {
            return Ok(None);
        };
        let before = state
            .products
            .get(&previous.product_id)
            .map(|p| p.quantity)
            .unwrap_or_default();

        if let Some(quantity) = patch.quantity {
            state.ensure_total_fits(&previous.product_id, Some(id), quantity)?;
        }

        let now = Utc::now();
        let mut updated = previous.clone();
        if let Some(quantity) = patch.quantity {
            updated.quantity = quantity;
        }
        if let Some(expiry_date) = patch.expiry_date {
            updated.expiry_date = expiry_date;
        }
        updated.updated_at = now;
        state.lotes.insert(id, updated.clone());
        let after = state.recompute_quantity(&previous.product_id, now);

        Ok(Some(LoteMutation {
            product: state.totals(&previous.product_id, before, after),
            lote: updated,
            previous: Some(previous),
        }))
    }

    async fn delete_lote(&self, id: LoteId) -> Result<Option<LoteMutation>, RepositoryError> {
        let mut state = self.state();
        let Some(previous) = state.lotes.remove(&id) else {
            return Ok(None);
        };
        let before = state
            .products
            .get(&previous.product_id)
            .map(|p| p.quantity)
            .unwrap_or_default();
        let after = state.recompute_quantity(&previous.product_id, Utc::now());

        Ok(Some(LoteMutation {
            product: state.totals(&previous.product_id, before, after),
            lote: previous.clone(),
            previous: Some(previous),
        }))
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, RepositoryError> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|creds| creds.user.username == username)
            .cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        if self.find_by_username(username).await?.is_some() {
            return Err(RepositoryError::Conflict("username already exists".to_owned()));
        }
        Ok(self.add_user(username, password_hash))
    }
}
