//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::db::{
    HistoryStore, LoteStore, PgHistoryStore, PgLoteStore, PgProductStore, PgUserStore,
    ProductStore, UserStore,
};
use crate::services::{AuthService, HistoryService, LoteService, ProductService, TokenIssuer};

/// The stores every service is built from.
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStore>,
    pub lotes: Arc<dyn LoteStore>,
    pub history: Arc<dyn HistoryStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    /// `PostgreSQL` stores sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            products: Arc::new(PgProductStore::new(pool.clone())),
            lotes: Arc::new(PgLoteStore::new(pool.clone())),
            history: Arc::new(PgHistoryStore::new(pool.clone())),
            users: Arc::new(PgUserStore::new(pool.clone())),
        }
    }

    /// Every store backed by the same in-memory store.
    #[cfg(any(test, feature = "test-helpers"))]
    #[must_use]
    pub fn memory(store: &Arc<crate::db::memory::MemoryStore>) -> Self {
        Self {
            products: store.clone(),
            lotes: store.clone(),
            history: store.clone(),
            users: store.clone(),
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    products: ProductService,
    lotes: LoteService,
    history: HistoryService,
    auth: AuthService,
    store_health: Arc<dyn ProductStore>,
}

impl AppState {
    /// Build the state for a running server.
    #[must_use]
    pub fn new(config: &ServerConfig, pool: &PgPool) -> Self {
        Self::from_stores(
            Stores::postgres(pool),
            TokenIssuer::new(&config.jwt_secret, config.jwt_expiration_hours),
        )
    }

    /// Build the state from explicit stores.
    #[must_use]
    pub fn from_stores(stores: Stores, tokens: TokenIssuer) -> Self {
        let history = HistoryService::new(stores.history);
        Self {
            inner: Arc::new(AppStateInner {
                products: ProductService::new(stores.products.clone(), history.clone()),
                lotes: LoteService::new(stores.lotes, history.clone()),
                auth: AuthService::new(stores.users, tokens),
                history,
                store_health: stores.products,
            }),
        }
    }

    #[must_use]
    pub fn products(&self) -> &ProductService {
        &self.inner.products
    }

    #[must_use]
    pub fn lotes(&self) -> &LoteService {
        &self.inner.lotes
    }

    #[must_use]
    pub fn history(&self) -> &HistoryService {
        &self.inner.history
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    /// Store pinged by `/health/ready`.
    #[must_use]
    pub fn store_health(&self) -> &dyn ProductStore {
        self.inner.store_health.as_ref()
    }
}
