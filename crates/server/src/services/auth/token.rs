//! HS256 bearer tokens.

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use estoque_core::UserId;

use super::AuthError;
use crate::models::User;

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a string.
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    /// `None` when the configured hours do not fit a `TimeDelta`.
    lifetime: Option<TimeDelta>,
}

impl TokenIssuer {
    /// Create an issuer whose tokens expire after `lifetime_hours`. A lifetime
    /// too large to represent makes every `issue` call fail.
    #[must_use]
    pub fn new(secret: &SecretString, lifetime_hours: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation: Validation::new(Algorithm::HS256),
            lifetime: TimeDelta::try_hours(lifetime_hours),
        }
    }

    /// Sign a token for `user`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenLifetime` if the expiry falls outside the
    /// representable range, and `AuthError::TokenSigning` if encoding fails.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let expires = self
            .lifetime
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(AuthError::TokenLifetime)?;
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check signature and expiry and return the user the token names.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for any token that does not verify.
    pub fn verify(&self, token: &str) -> Result<User, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            AuthError::InvalidToken
        })?;

        let id: i32 = data
            .claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(User {
            id: UserId::new(id),
            username: data.claims.username,
        })
    }
}
