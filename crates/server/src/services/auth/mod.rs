//! Authentication service.
//!
//! Username/password login against Argon2id hashes, answered with an HS256
//! bearer token.

mod error;
pub mod token;

pub use error::AuthError;
pub use token::{Claims, TokenIssuer};

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::Serialize;

use crate::db::{RepositoryError, UserStore};
use crate::models::User;

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: TokenIssuer,
}

impl AuthService {
    /// Create a new authentication service.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenIssuer) -> Self {
        Self { users, tokens }
    }

    /// Check a username/password pair and issue a token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown user or a wrong
    /// password.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let credentials = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &credentials.password_hash)?;

        let token = self.tokens.issue(&credentials.user)?;
        tracing::info!(user_id = %credentials.user.id, "User logged in");

        Ok(LoginResponse {
            token,
            user: credentials.user,
        })
    }

    /// Resolve a bearer token to its user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` if the token does not verify.
    pub fn verify_token(&self, token: &str) -> Result<User, AuthError> {
        self.tokens.verify(token)
    }

    /// Provision a user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::WeakPassword` for a short password or blank
    /// username, and `AuthError::UserAlreadyExists` for a taken username.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::WeakPassword("username cannot be empty".to_owned()));
        }
        validate_password(password)?;

        let hash = hash_password(password)?;
        let user = self
            .users
            .create_user(username, &hash)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })?;

        tracing::info!(user_id = %user.id, "User created");
        Ok(user)
    }
}

/// Validate password meets requirements.
fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use secrecy::SecretString;

    fn service() -> (Arc<MemoryStore>, AuthService) {
        let store = Arc::new(MemoryStore::new());
        let tokens = TokenIssuer::new(
            &SecretString::from("k3Y-for-t0kens-in-unit-tests-0123456789".to_owned()),
            1,
        );
        (store.clone(), AuthService::new(store, tokens))
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(verify_password("wrong horse", &hash).is_err());
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_token() {
        let (_, service) = service();
        service.create_user("admin", "s3cret-pass").await.unwrap();

        let login = service.login("admin", "s3cret-pass").await.unwrap();

        assert_eq!(login.user.username, "admin");
        assert_eq!(service.verify_token(&login.token).unwrap(), login.user);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let (_, service) = service();
        service.create_user("admin", "s3cret-pass").await.unwrap();

        assert!(matches!(
            service.login("admin", "nope-nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login("ghost", "s3cret-pass").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_create_user_rules() {
        let (_, service) = service();

        assert!(matches!(
            service.create_user("admin", "short").await,
            Err(AuthError::WeakPassword(_))
        ));
        service.create_user("admin", "long-enough").await.unwrap();
        assert!(matches!(
            service.create_user("admin", "long-enough").await,
            Err(AuthError::UserAlreadyExists)
        ));
    }
}
