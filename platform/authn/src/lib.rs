//! Platform authentication helpers.
//!
//! Credentials and sessions are issued elsewhere; requests reach us with an
//! HS256 bearer token whose subject is the user id. This crate only verifies
//! those tokens, plus an issuing helper for operator tooling and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
    pub ttl_minutes: i64,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

impl TokenConfig {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_minutes: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_minutes,
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

pub fn issue_token(user_id: Uuid, config: &TokenConfig) -> Result<String, AuthnError> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::minutes(config.ttl_minutes))
        .unwrap_or(now)
        .timestamp() as usize;
    let claims = SessionClaims {
        sub: user_id,
        exp,
        iat: now.timestamp() as usize,
    };
    Ok(jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &config.encoding_key(),
    )?)
}

pub fn verify_token(token: &str, config: &TokenConfig) -> Result<SessionClaims, AuthnError> {
    let data = jsonwebtoken::decode::<SessionClaims>(
        token,
        &config.decoding_key(),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthnError> {
    let value = header.ok_or(AuthnError::MissingToken)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthnError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthnError::MissingToken);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TokenConfig {
        TokenConfig::new(vec![7u8; 32], 60)
    }

    #[test]
    fn issued_token_verifies() {
        let user = Uuid::new_v4();
        let token = issue_token(user, &config()).unwrap();
        let claims = verify_token(&token, &config()).unwrap();
        assert_eq!(claims.sub, user);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), &config()).unwrap();
        let other = TokenConfig::new(vec![9u8; 32], 60);
        assert!(matches!(
            verify_token(&token, &other),
            Err(AuthnError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let expired = TokenConfig::new(vec![7u8; 32], -10);
        let token = issue_token(Uuid::new_v4(), &expired).unwrap();
        assert!(verify_token(&token, &config()).is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(Some("abc")).is_err());
    }
}
