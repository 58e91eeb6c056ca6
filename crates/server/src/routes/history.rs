//! History handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use estoque_core::{
    BatchId, EntityType, HistoryRecord, NewHistoryRecord, PaginatedHistoryBatchGroups,
    ProductBatchContextChangeDetail, ProductId,
};

use crate::error::AppError;
use crate::middleware::{OperationBatch, RequireAuth};
use crate::state::AppState;

/// Default number of records returned by `GET /history`.
pub const DEFAULT_LIMIT: u32 = 20;

/// Default number of batch groups per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Parse a positive integer query value, falling back to `default` for
/// anything missing, unparsable or non-positive.
fn positive_or(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
        .map_or(default, |value| u32::try_from(value).unwrap_or(u32::MAX))
}

/// Query of `GET /history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    #[serde(alias = "batchId")]
    pub batch_id: Option<String>,
}

/// Recent history, or the records of one batch when `batch_id` is given.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    if let Some(batch_id) = query
        .batch_id
        .as_deref()
        .map(str::trim)
        .filter(|batch| !batch.is_empty())
    {
        let records = state.history().by_batch(&BatchId::new(batch_id)).await?;
        return Ok(Json(records));
    }

    let limit = positive_or(query.limit.as_deref(), DEFAULT_LIMIT);
    let offset = query
        .offset
        .as_deref()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(0);

    Ok(Json(state.history().history(limit, offset).await?))
}

/// Append one record. Id, timestamp and batch id default when absent.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: Result<Json<NewHistoryRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<HistoryRecord>), AppError> {
    let Json(entry) = payload?;
    let record = state.history().create_entry(entry, Some(user.id)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Records of one product or lote, newest first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn for_entity(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    let entity_type = match entity_type.parse() {
        Ok(kind @ (EntityType::Product | EntityType::Lote)) => kind,
        _ => {
            return Err(AppError::BadRequest(
                "Invalid entity type. Must be 'product' or 'lote'.".to_owned(),
            ));
        }
    };

    let records = state
        .history()
        .history_for_entity(entity_type, &entity_id)
        .await?;
    Ok(Json(records))
}

/// Append several records atomically under one new batch id.
#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create_batch(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    payload: Result<Json<Vec<NewHistoryRecord>>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(entries) = payload?;
    let (batch_id, records) = state
        .history()
        .create_batch(entries, Some(user.id))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "History batch created",
            "batchId": batch_id,
            "count": records.len(),
        })),
    ))
}

/// Records of one batch, oldest first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn show_batch(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(batch_id): Path<String>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    Ok(Json(state.history().by_batch(&BatchId::new(batch_id)).await?))
}

/// Query of `GET /history/grouped`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedQuery {
    pub page: Option<String>,
    #[serde(alias = "page_size")]
    pub page_size: Option<String>,
}

/// One page of batch groups, most recent first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn grouped(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<GroupedQuery>,
) -> Result<Json<PaginatedHistoryBatchGroups>, AppError> {
    let page = positive_or(query.page.as_deref(), 1);
    let page_size = positive_or(query.page_size.as_deref(), DEFAULT_PAGE_SIZE);
    Ok(Json(state.history().grouped_history(page, page_size).await?))
}

/// Body of `POST /history/product-context`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductContextRequest {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default, alias = "productNameSnapshot")]
    pub product_name: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity_before_batch: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub quantity_after_batch: Option<Decimal>,
}

/// Record a product's quantity snapshot for the batch named by the
/// `X-Operation-Batch-ID` header.
#[instrument(skip(state, user, batch, payload), fields(user_id = %user.id))]
pub async fn product_context(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    batch: OperationBatch,
    payload: Result<Json<ProductContextRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<HistoryRecord>), AppError> {
    let Json(request) = payload?;
    let batch_id = batch.into_inner().unwrap_or_else(|| BatchId::new(""));

    let detail = ProductBatchContextChangeDetail {
        product_id: ProductId::new(request.product_id.unwrap_or_default()),
        product_name: request.product_name.unwrap_or_default(),
        quantity_before_batch: request.quantity_before_batch.unwrap_or_default(),
        quantity_after_batch: request.quantity_after_batch.unwrap_or_default(),
    };

    let record = state
        .history()
        .record_product_context(batch_id, detail, Some(user.id))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_or_defaults() {
        assert_eq!(positive_or(None, DEFAULT_LIMIT), 20);
        assert_eq!(positive_or(Some("abc"), DEFAULT_LIMIT), 20);
        assert_eq!(positive_or(Some("0"), DEFAULT_LIMIT), 20);
        assert_eq!(positive_or(Some("-5"), DEFAULT_LIMIT), 20);
        assert_eq!(positive_or(Some(" 7 "), DEFAULT_LIMIT), 7);
    }

    #[test]
    fn test_positive_or_saturates_huge_values() {
        assert_eq!(positive_or(Some("99999999999"), 1), u32::MAX);
    }
}
