//! Login, token verification and route protection.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;

use estoque_integration_tests::{PASSWORD, TestApp, TestRequest, USERNAME};

#[tokio::test]
async fn test_login_returns_usable_token() {
    let app = TestApp::new();

    let response = app
        .send(
            TestRequest::post("/auth/login")
                .anonymous()
                .json(&json!({ "username": USERNAME, "password": PASSWORD })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text);

    let body = response.json();
    assert_eq!(body["user"]["username"], USERNAME);
    let token = body["token"].as_str().unwrap().to_owned();

    let verify = app
        .send(
            TestRequest::get("/auth/verify")
                .anonymous()
                .header("Authorization", &format!("Bearer {token}")),
        )
        .await;
    assert_eq!(verify.status, StatusCode::OK);
    assert_eq!(verify.json()["valid"], true);
    assert_eq!(verify.json()["user"]["id"], app.user.id.as_i32());
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new();

    let response = app
        .send(
            TestRequest::post("/auth/login")
                .anonymous()
                .json(&json!({ "username": USERNAME, "password": "not the password" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error(), "Invalid credentials");

    let unknown = app
        .send(
            TestRequest::post("/auth/login")
                .anonymous()
                .json(&json!({ "username": "nobody", "password": PASSWORD })),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.error(), "Invalid credentials");
}

#[tokio::test]
async fn test_login_with_bad_body_is_bad_request() {
    let app = TestApp::new();

    let malformed = app
        .send(TestRequest::post("/auth/login").anonymous().raw("{not json"))
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert!(malformed.error().starts_with("Invalid request body"));

    let missing = app
        .send(
            TestRequest::post("/auth/login")
                .anonymous()
                .json(&json!({ "username": USERNAME })),
        )
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new();

    for request in [
        TestRequest::post("/products").json(&json!({ "name": "X", "unit": "L" })),
        TestRequest::get("/history"),
        TestRequest::get("/history/grouped"),
        TestRequest::post("/history/batch").json(&json!([])),
        TestRequest::get("/auth/verify"),
    ] {
        let response = app.send(request.anonymous()).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.error(), "Authorization token required");
    }
    assert_eq!(app.store.history_len(), 0);
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = TestApp::new();

    let response = app
        .send(
            TestRequest::get("/history")
                .anonymous()
                .header("Authorization", "Bearer not.a.jwt"),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error(), "Invalid or expired token");

    let wrong_scheme = app
        .send(
            TestRequest::get("/history")
                .anonymous()
                .header("Authorization", &format!("Basic {}", app.token())),
        )
        .await;
    assert_eq!(wrong_scheme.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_product_reads_are_public() {
    let app = TestApp::new();
    app.create_product("p1", "Alade", "L").await;

    let list = app.send(TestRequest::get("/products").anonymous()).await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.json().as_array().unwrap().len(), 1);

    let one = app.send(TestRequest::get("/products/p1").anonymous()).await;
    assert_eq!(one.status, StatusCode::OK);
    assert_eq!(one.json()["name"], "Alade");
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let live = app.send(TestRequest::get("/health").anonymous()).await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.text, "ok");

    let ready = app.send(TestRequest::get("/health/ready").anonymous()).await;
    assert_eq!(ready.status, StatusCode::OK);

    app.store.set_unreachable(true);
    let down = app.send(TestRequest::get("/health/ready").anonymous()).await;
    assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(down.error(), "Database unavailable");
    assert_eq!(
        app.send(TestRequest::get("/health").anonymous()).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_responses_carry_request_id_and_security_headers() {
    let app = TestApp::new();

    let response = app
        .send(
            TestRequest::get("/health")
                .anonymous()
                .header("x-request-id", "req-123"),
        )
        .await;
    assert_eq!(response.headers["x-request-id"], "req-123");
    assert_eq!(response.headers["x-content-type-options"], "nosniff");
    assert_eq!(response.headers["x-frame-options"], "DENY");
}
