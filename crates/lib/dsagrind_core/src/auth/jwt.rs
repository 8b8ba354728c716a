//! JWT access token issuance and validation.

use std::path::PathBuf;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info};

use super::AuthError;
use crate::config::{SessionConfig, to_chrono};
use crate::models::auth::{AccessToken, TokenClaims, User};
use crate::uuid::uuidv7;

/// The only algorithm tokens are signed with or accepted under.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signs and validates access tokens with a symmetric key.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: chrono::Duration,
    leeway_secs: u64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(config: &SessionConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: to_chrono(config.access_token_ttl),
            leeway_secs: config.leeway_secs,
        }
    }

    /// Generate a signed access token for `user`.
    ///
    /// The returned `expires_at` is the same instant as the `exp` claim.
    pub fn issue_access_token(&self, user: &User) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = TokenClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            email_verified: user.email_verified,
            plan: user.subscription.plan,
            subscription_status: user.subscription.status,
            jti: uuidv7().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = self.sign(&claims)?;
        Ok(AccessToken {
            token,
            // Second precision, matching what a client decodes from `exp`.
            expires_at: chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
        })
    }

    pub(crate) fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = validate_exp;
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation
    }

    /// Verify signature, algorithm, issuer, audience, and expiry. Returns
    /// `None` on any failure.
    pub fn validate(&self, token: &str) -> Option<TokenClaims> {
        match decode::<TokenClaims>(token, &self.decoding, &self.validation(true)) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "access token rejected");
                None
            }
        }
    }

    /// Like [`validate`](Self::validate) but accepts tokens whose only
    /// defect is being expired.
    pub fn validate_allow_expired(&self, token: &str) -> Option<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation(false))
            .ok()
            .map(|data| data.claims)
    }

    /// Read a single claim from a valid token.
    pub fn claim(&self, token: &str, name: &str) -> Option<serde_json::Value> {
        decode::<serde_json::Value>(token, &self.decoding, &self.validation(true))
            .ok()
            .and_then(|data| data.claims.get(name).cloned())
    }

    /// Subject of a valid token.
    pub fn user_id(&self, token: &str) -> Option<String> {
        self.validate(token).map(|claims| claims.sub)
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dsagrind")
        .join("jwt-secret")
}
