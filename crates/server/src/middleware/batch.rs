//! Operation batch header extractor.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use estoque_core::BatchId;

/// Header a client sets to group the history of several requests issued
/// for one user action.
pub const OPERATION_BATCH_HEADER: &str = "x-operation-batch-id";

/// The `X-Operation-Batch-ID` header, if present and non-blank.
///
/// A header that is missing, blank or not valid UTF-8 yields `None`, in
/// which case the service generates a batch id per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationBatch(pub Option<BatchId>);

impl OperationBatch {
    /// Consume the extractor, returning the batch id.
    #[must_use]
    pub fn into_inner(self) -> Option<BatchId> {
        self.0
    }
}

impl<S> FromRequestParts<S> for OperationBatch
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let batch_id = parts
            .headers
            .get(OPERATION_BATCH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(BatchId::new);

        Ok(Self(batch_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> OperationBatch {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("X-Operation-Batch-ID", value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        OperationBatch::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_header_is_read_case_insensitively() {
        let batch = extract(Some("op-42")).await;
        assert_eq!(batch.into_inner(), Some(BatchId::new("op-42")));
    }

    #[tokio::test]
    async fn test_missing_or_blank_header_is_none() {
        assert_eq!(extract(None).await, OperationBatch(None));
        assert_eq!(extract(Some("   ")).await, OperationBatch(None));
    }
}
