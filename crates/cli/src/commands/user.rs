//! User management commands.
//!
//! # Usage
//!
//! ```bash
//! ESTOQUE_USER_PASSWORD='...' estoque user create -u operator
//! ```
//!
//! # Environment Variables
//!
//! Reads the same configuration as the server (`ESTOQUE_DATABASE_URL`,
//! `ESTOQUE_JWT_SECRET`, ...).

use estoque_server::config::ServerConfig;
use estoque_server::db;
use estoque_server::models::User;
use estoque_server::state::AppState;

/// Create a user with an Argon2id password hash.
///
/// # Errors
///
/// Returns an error if configuration is missing, the password is shorter
/// than 8 characters, or the username is already taken.
pub async fn create_user(
    username: &str,
    password: &str,
) -> Result<User, Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    let state = AppState::new(&config, &pool);

    let user = state.auth().create_user(username, password).await?;

    tracing::info!(
        "User created successfully! ID: {}, Username: {}",
        user.id,
        user.username
    );
    Ok(user)
}
