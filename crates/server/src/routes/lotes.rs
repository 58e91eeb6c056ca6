//! Lote handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::instrument;

use estoque_core::{Lote, LoteId, ProductId};

use crate::error::AppError;
use crate::middleware::{OperationBatch, RequireAuth};
use crate::services::InventoryError;
use crate::services::AuditContext;
use crate::services::inventory::{CreateLoteRequest, UpdateLoteRequest};
use crate::state::AppState;

/// A lote id from the path. Anything that is not a UUID cannot name a lote.
fn parse_lote_id(raw: &str) -> Result<LoteId, AppError> {
    raw.parse()
        .map_err(|_| AppError::from(InventoryError::LoteNotFound))
}

/// Lotes of a product, earliest expiry first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(product_id): Path<String>,
) -> Result<Json<Vec<Lote>>, AppError> {
    let lotes = state
        .lotes()
        .list_for_product(&ProductId::new(product_id))
        .await?;
    Ok(Json(lotes))
}

/// Add a lote to a product.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    Path(product_id): Path<String>,
    payload: Result<Json<CreateLoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Lote>), AppError> {
    let Json(request) = payload?;
    let lote = state
        .lotes()
        .create(
            &ProductId::new(product_id),
            request,
            AuditContext::new(user.id, batch_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lote)))
}

/// Change a lote's quantity and/or expiry date.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    Path(id): Path<String>,
    payload: Result<Json<UpdateLoteRequest>, JsonRejection>,
) -> Result<Json<Lote>, AppError> {
    let id = parse_lote_id(&id)?;
    let Json(request) = payload?;
    let lote = state
        .lotes()
        .update(id, request, AuditContext::new(user.id, batch_id))
        .await?;
    Ok(Json(lote))
}

/// Delete a lote.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    OperationBatch(batch_id): OperationBatch,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let lote = state
        .lotes()
        .delete(parse_lote_id(&id)?, AuditContext::new(user.id, batch_id))
        .await?;
    Ok(Json(json!({
        "message": "Lote deleted",
        "id": lote.id,
    })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_non_uuid_lote_id_is_not_found() {
        let err = parse_lote_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.to_string(), "Lote not found");
    }

    #[test]
    fn test_uuid_lote_id_parses() {
        let id = LoteId::generate();
        assert_eq!(parse_lote_id(&id.to_string()).ok(), Some(id));
    }
}
