//! Integration test harness for Estoque.
//!
//! Drives the full router (middleware, extractors, handlers, services) over
//! an in-memory store, so the tests need no database.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p estoque-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::{Arc, OnceLock};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use estoque_server::db::memory::MemoryStore;
use estoque_server::models::User;
use estoque_server::services::TokenIssuer;
use estoque_server::services::auth::hash_password;
use estoque_server::state::{AppState, Stores};

/// Username provisioned in every [`TestApp`].
pub const USERNAME: &str = "operator";

/// Password of [`USERNAME`].
pub const PASSWORD: &str = "correct horse battery";

const JWT_SECRET: &str = "aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6%";

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Argon2 hashing is slow in debug builds; hash the shared password once.
fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).unwrap())
}

/// A router over a fresh in-memory store, with one provisioned user.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub user: User,
    token: String,
    router: Router,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let user = store.add_user(USERNAME, password_hash());

        let tokens = TokenIssuer::new(&SecretString::from(JWT_SECRET), 1);
        let token = tokens.issue(&user).unwrap();

        let state = AppState::from_stores(Stores::memory(&store), tokens);
        let router = estoque_server::app(state, None);

        Self {
            store,
            user,
            token,
            router,
        }
    }

    /// A valid bearer token for [`TestApp::user`].
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request through the router.
    pub async fn send(&self, request: TestRequest) -> TestResponse {
        let mut builder = Request::builder()
            .method(request.method)
            .uri(&request.uri);

        if request.authenticated {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body = match request.body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();

        TestResponse {
            status,
            headers,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// Create a product through the API and return its JSON.
    pub async fn create_product(&self, id: &str, name: &str, unit: &str) -> Value {
        let response = self
            .send(TestRequest::post("/products").json(&serde_json::json!({
                "id": id,
                "name": name,
                "unit": unit,
            })))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.json()
    }

    /// Create a lote through the API and return its JSON.
    pub async fn create_lote(
        &self,
        product_id: &str,
        quantity: f64,
        expiry_date: &str,
        batch: Option<&str>,
    ) -> Value {
        let mut request = TestRequest::post(&format!("/products/{product_id}/lotes")).json(
            &serde_json::json!({ "quantity": quantity, "expiryDate": expiry_date }),
        );
        if let Some(batch) = batch {
            request = request.batch(batch);
        }
        let response = self.send(request).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.json()
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A request to send through [`TestApp::send`]. Authenticated by default.
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: Method,
    uri: String,
    body: Option<String>,
    headers: Vec<(String, String)>,
    authenticated: bool,
}

impl TestRequest {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            body: None,
            headers: Vec::new(),
            authenticated: true,
        }
    }

    #[must_use]
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    #[must_use]
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    #[must_use]
    pub fn put(uri: &str) -> Self {
        Self::new(Method::PUT, uri)
    }

    #[must_use]
    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// JSON body.
    #[must_use]
    pub fn json(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Body sent verbatim with a JSON content type.
    #[must_use]
    pub fn raw(mut self, body: &str) -> Self {
        self.body = Some(body.to_owned());
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Set `X-Operation-Batch-ID`.
    #[must_use]
    pub fn batch(self, batch_id: &str) -> Self {
        self.header("X-Operation-Batch-ID", batch_id)
    }

    /// Send without the bearer token.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl TestResponse {
    /// The body as JSON, or `Value::Null` if it is not JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }

    /// The `error` message of an error body.
    #[must_use]
    pub fn error(&self) -> String {
        self.json()["error"].as_str().unwrap_or_default().to_owned()
    }
}
