//! Login and token verification handlers.

use axum::{Json, extract::State, extract::rejection::JsonRejection};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::AppError;
use crate::middleware::RequireAuth;
use crate::services::LoginResponse;
use crate::state::AppState;

/// Body of `POST /auth/login`.
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Exchange a username/password pair for a bearer token.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(request) = payload?;
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".to_owned(),
        ));
    }

    let response = state
        .auth()
        .login(request.username.trim(), &request.password)
        .await?;

    tracing::info!(user_id = %response.user.id, "User logged in");
    Ok(Json(response))
}

/// Confirm that the bearer token is still valid.
pub async fn verify(RequireAuth(user): RequireAuth) -> Json<Value> {
    Json(json!({ "valid": true, "user": user }))
}
