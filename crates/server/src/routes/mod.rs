//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! # Auth
//! POST   /auth/login                    - Exchange username/password for a token
//! GET    /auth/verify                   - Check a bearer token
//!
//! # Products (reads are public)
//! GET    /products                      - List products with their lotes
//! POST   /products                      - Create product
//! GET    /products/{id}                 - Product detail
//! PUT    /products/{id}                 - Update product
//! DELETE /products/{id}                 - Delete product and its lotes
//!
//! # Lotes
//! GET    /products/{id}/lotes           - Lotes of a product
//! POST   /products/{id}/lotes           - Add a lote
//! PUT    /lotes/{id}                    - Update lote
//! DELETE /lotes/{id}                    - Delete lote
//!
//! # History
//! GET    /history                       - Recent records (or one batch with ?batch_id=)
//! POST   /history                       - Append one record
//! POST   /history/batch                 - Append records under one new batch id
//! GET    /history/batch/{batchId}       - Records of one batch
//! GET    /history/grouped               - Paginated batch groups
//! POST   /history/product-context       - Product snapshot for the current batch
//! GET    /history/{entityType}/{entityId} - Records of one product or lote
//! ```
//!
//! Mutating routes read the optional `X-Operation-Batch-ID` header so that
//! several requests issued for one user action share a history batch.

pub mod auth;
pub mod history;
pub mod lotes;
pub mod products;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/verify", get(auth::verify))
}

/// Create the product and nested lote routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index).post(products::create))
        .route(
            "/{id}",
            get(products::show)
                .put(products::update)
                .delete(products::delete),
        )
        .route("/{id}/lotes", get(lotes::index).post(lotes::create))
}

/// Create the lote routes router.
pub fn lote_routes() -> Router<AppState> {
    Router::new().route("/{id}", put(lotes::update).delete(lotes::delete))
}

/// Create the history routes router.
pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(history::index).post(history::create))
        .route("/batch", post(history::create_batch))
        .route("/batch/{batch_id}", get(history::show_batch))
        .route("/grouped", get(history::grouped))
        .route("/product-context", post(history::product_context))
        .route("/{entity_type}/{entity_id}", get(history::for_entity))
}

/// Create all API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes())
        .nest("/products", product_routes())
        .nest("/lotes", lote_routes())
        .nest("/history", history_routes())
}
