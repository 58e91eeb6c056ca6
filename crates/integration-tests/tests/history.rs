//! History endpoints: raw entries, client batches and grouped views.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::http::StatusCode;
use serde_json::{Value, json};

use estoque_integration_tests::{TestApp, TestRequest};

fn client_batch() -> Value {
    json!([
        {
            "entityType": "lote",
            "entityId": "lote-9",
            "changes": { "action": "deleted", "productId": "P9", "quantityBefore": 5 }
        },
        {
            "entityType": "product_batch_context",
            "entityId": "P9",
            "changes": {
                "productId": "P9",
                "productName": "Nine",
                "quantityBeforeBatch": 5,
                "quantityAfterBatch": 0
            }
        }
    ])
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_empty_batch_is_rejected_without_writes() {
    let app = TestApp::new();

    let response = app
        .send(TestRequest::post("/history/batch").json(&json!([])))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error(), "Empty batch - no history entries provided");
    assert_eq!(app.store.history_len(), 0);
}

#[tokio::test]
async fn test_client_batch_shares_one_batch_id() {
    let app = TestApp::new();

    let response = app
        .send(TestRequest::post("/history/batch").json(&client_batch()))
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
    let body = response.json();
    assert_eq!(body["count"], 2);
    let batch_id = body["batchId"].as_str().unwrap().to_owned();

    let by_path = app
        .send(TestRequest::get(&format!("/history/batch/{batch_id}")))
        .await
        .json();
    let records = by_path.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record["batchId"] == batch_id.as_str()));
    assert_eq!(records[0]["entityType"], "lote");
    assert_eq!(records[1]["entityType"], "product_batch_context");

    let by_query = app
        .send(TestRequest::get(&format!("/history?batch_id={batch_id}")))
        .await
        .json();
    assert_eq!(by_query, by_path);
}

#[tokio::test]
async fn test_failed_batch_write_stores_nothing() {
    let app = TestApp::new();
    app.store.fail_history_writes_after(1);

    let response = app
        .send(TestRequest::post("/history/batch").json(&client_batch()))
        .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.error(), "Internal server error");
    assert_eq!(app.store.history_len(), 0);
}

#[tokio::test]
async fn test_single_entry_defaults_batch_to_own_id() {
    let app = TestApp::new();

    let response = app
        .send(TestRequest::post("/history").json(&json!({
            "entityType": "product",
            "entityId": "P1",
            "changes": { "action": "created", "productName": "Alade", "quantityAfter": 3 }
        })))
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);

    let record = response.json();
    assert_eq!(record["batchId"], record["id"]);
    assert_eq!(record["changes"]["productName"], "Alade");
    assert_eq!(record["changes"]["quantityAfter"].as_f64(), Some(3.0));
}

#[tokio::test]
async fn test_reused_entry_id_is_conflict() {
    let app = TestApp::new();
    let entry = json!({
        "id": "0b9a3c52-8a3e-4f0e-9d2b-4c1f6a7e2d10",
        "entityType": "product",
        "entityId": "P1",
        "changes": { "action": "created", "productName": "Alade" }
    });

    let first = app.send(TestRequest::post("/history").json(&entry)).await;
    assert_eq!(first.status, StatusCode::CREATED, "{}", first.text);

    let second = app.send(TestRequest::post("/history").json(&entry)).await;
    assert_eq!(second.status, StatusCode::CONFLICT, "{}", second.text);
    assert_eq!(second.error(), "history record id already exists");

    let mut batch = client_batch();
    batch[0]["id"] = entry["id"].clone();
    let in_batch = app.send(TestRequest::post("/history/batch").json(&batch)).await;
    assert_eq!(in_batch.status, StatusCode::CONFLICT);
    assert_eq!(app.store.history_len(), 1);
}

#[tokio::test]
async fn test_entries_are_attributed_to_the_caller() {
    let app = TestApp::new();

    // A client-supplied actor is replaced by the token's user.
    let record = app
        .send(TestRequest::post("/history").json(&json!({
            "entityType": "product",
            "entityId": "P1",
            "userId": 999,
            "changes": { "action": "created", "productName": "Alade" }
        })))
        .await
        .json();
    assert_eq!(record["userId"], app.user.id.as_i32());

    let body = app
        .send(TestRequest::post("/history/batch").json(&client_batch()))
        .await
        .json();
    let batch_id = body["batchId"].as_str().unwrap();
    let records = app
        .send(TestRequest::get(&format!("/history/batch/{batch_id}")))
        .await
        .json();
    assert!(
        records
            .as_array()
            .unwrap()
            .iter()
            .all(|record| record["userId"] == app.user.id.as_i32())
    );
}

#[tokio::test]
async fn test_entry_with_unknown_entity_type_is_bad_request() {
    let app = TestApp::new();

    let response = app
        .send(TestRequest::post("/history").json(&json!({
            "entityType": "warehouse",
            "entityId": "W1",
            "changes": {}
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.history_len(), 0);
}

#[tokio::test]
async fn test_product_context_requires_header_and_product() {
    let app = TestApp::new();
    let body = json!({ "productId": "P1", "productName": "Alade", "quantityBeforeBatch": 1, "quantityAfterBatch": 2 });

    let no_header = app
        .send(TestRequest::post("/history/product-context").json(&body))
        .await;
    assert_eq!(no_header.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_header.error(), "X-Operation-Batch-ID header is required");

    let no_product = app
        .send(
            TestRequest::post("/history/product-context")
                .batch("CTX")
                .json(&json!({ "quantityAfterBatch": 2 })),
        )
        .await;
    assert_eq!(no_product.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_product.error(), "productId is required in payload");

    let ok = app
        .send(
            TestRequest::post("/history/product-context")
                .batch("CTX")
                .json(&body),
        )
        .await;
    assert_eq!(ok.status, StatusCode::CREATED, "{}", ok.text);
    let record = ok.json();
    assert_eq!(record["batchId"], "CTX");
    assert_eq!(record["entityType"], "product_batch_context");
    assert_eq!(app.store.history_len(), 1);
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_history_for_entity() {
    let app = TestApp::new();
    app.create_product("P1", "Alade", "L").await;
    app.create_product("P2", "Curbix", "L").await;

    let response = app.send(TestRequest::get("/history/product/P1")).await;
    assert_eq!(response.status, StatusCode::OK);
    let records = response.json();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["entityId"], "P1");
    assert_eq!(records[0]["changes"]["isNewProduct"], true);

    let bad_type = app
        .send(TestRequest::get("/history/product_batch_context/P1"))
        .await;
    assert_eq!(bad_type.status, StatusCode::BAD_REQUEST);

    let unknown = app.send(TestRequest::get("/history/customer/P1")).await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recent_history_limit_and_offset() {
    let app = TestApp::new();
    for id in ["P1", "P2", "P3"] {
        app.create_product(id, id, "L").await;
    }
    assert_eq!(app.store.history_len(), 6);

    let all = app.send(TestRequest::get("/history")).await.json();
    assert_eq!(all.as_array().unwrap().len(), 6);

    let limited = app.send(TestRequest::get("/history?limit=4")).await.json();
    assert_eq!(limited.as_array().unwrap().len(), 4);

    let offset = app
        .send(TestRequest::get("/history?limit=4&offset=4"))
        .await
        .json();
    assert_eq!(offset.as_array().unwrap().len(), 2);

    let garbage = app.send(TestRequest::get("/history?limit=abc")).await;
    assert_eq!(garbage.status, StatusCode::OK);
    assert_eq!(garbage.json().as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_grouped_history_pagination() {
    let app = TestApp::new();
    for id in ["P1", "P2", "P3"] {
        app.create_product(id, id, "L").await;
    }

    let first = app
        .send(TestRequest::get("/history/grouped?page=1&pageSize=2"))
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.text);
    let first = first.json();
    assert_eq!(first["totalBatches"], 3);
    assert_eq!(first["totalPages"], 2);
    assert_eq!(first["page"], 1);
    assert_eq!(first["pageSize"], 2);
    assert_eq!(first["groups"].as_array().unwrap().len(), 2);

    let second = app
        .send(TestRequest::get("/history/grouped?page=2&pageSize=2"))
        .await
        .json();
    assert_eq!(second["groups"].as_array().unwrap().len(), 1);

    let past_end = app
        .send(TestRequest::get("/history/grouped?page=5&pageSize=2"))
        .await
        .json();
    assert!(past_end["groups"].as_array().unwrap().is_empty());
    assert_eq!(past_end["totalPages"], 2);

    let defaults = app
        .send(TestRequest::get("/history/grouped?page=x&pageSize=0"))
        .await
        .json();
    assert_eq!(defaults["page"], 1);
    assert_eq!(defaults["pageSize"], 10);
    assert_eq!(defaults["groups"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_grouped_history_merges_one_user_action() {
    let app = TestApp::new();
    app.create_product("P1", "Magnum", "kg").await;

    app.create_lote("P1", 10.0, "2025-01-01", Some("ACTION")).await;
    app.create_lote("P1", 5.0, "2025-02-01", Some("ACTION")).await;

    let page = app
        .send(TestRequest::get("/history/grouped?pageSize=100"))
        .await
        .json();
    let group = page["groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|group| group["batchId"] == "ACTION")
        .unwrap()
        .clone();

    assert_eq!(group["recordCount"], 4);
    assert_eq!(group["records"].as_array().unwrap().len(), 4);

    let summary = &group["productSummaries"]["P1"];
    assert_eq!(summary["productName"], "Magnum");
    assert_eq!(summary["totalQuantityBeforeBatch"].as_f64(), Some(0.0));
    assert_eq!(summary["totalQuantityAfterBatch"].as_f64(), Some(15.0));
    assert_eq!(summary["netQuantityChangeInBatch"].as_f64(), Some(15.0));

    for record in group["records"].as_array().unwrap() {
        assert_eq!(record["productContext"]["status"], "available");
        assert_eq!(record["productContext"]["productId"], "P1");
    }
}

#[tokio::test]
async fn test_grouped_history_without_snapshot_is_unavailable() {
    let app = TestApp::new();

    app.send(TestRequest::post("/history").json(&json!({
        "entityType": "lote",
        "entityId": "legacy-lote",
        "changes": { "action": "updated" }
    })))
    .await;

    let page = app.send(TestRequest::get("/history/grouped")).await.json();
    let group = &page["groups"][0];
    assert_eq!(group["recordCount"], 1);
    assert_eq!(group["records"][0]["productContext"]["status"], "unavailable");
    assert!(group["productSummaries"].as_object().unwrap().is_empty());
}
