//! Product handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::instrument;

use estoque_core::{Product, ProductId};

use crate::error::AppError;
use crate::middleware::{OperationBatch, RequireAuth};
use crate::services::AuditContext;
use crate::services::inventory::{CreateProductRequest, UpdateProductRequest};
use crate::state::AppState;

/// List all products with their lotes.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Product>>, AppError> {
    Ok(Json(state.products().list().await?))
}

/// One product with its lotes.
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, AppError> {
    Ok(Json(state.products().get(&ProductId::new(id)).await?))
}

/// Create a product.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let Json(request) = payload?;
    let product = state
        .products()
        .create(request, AuditContext::new(user.id, batch_id))
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// Update a product's name, unit or (lote-less) quantity.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> Result<Json<Product>, AppError> {
    let Json(request) = payload?;
    let product = state
        .products()
        .update(&ProductId::new(id), request, AuditContext::new(user.id, batch_id))
        .await?;
    Ok(Json(product))
}

/// Delete a product together with its lotes.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let product = state
        .products()
        .delete(&ProductId::new(id), AuditContext::new(user.id, batch_id))
        .await?;
    Ok(Json(json!({
        "message": "Product deleted",
        "id": product.id,
    })))
}
