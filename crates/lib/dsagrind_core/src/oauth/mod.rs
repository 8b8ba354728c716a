//! Third-party sign-in (Google, GitHub).
//!
//! The session service only sees the [`OAuthClient`] port; state handling
//! and provider HTTP exchanges live in [`http`].

pub mod http;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpOAuthClient;

/// OAuth errors.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Unsupported OAuth provider: {0}")]
    UnsupportedProvider(String),

    #[error("OAuth provider not configured: {0}")]
    NotConfigured(OAuthProvider),

    #[error("OAuth state is invalid or expired")]
    InvalidState,

    #[error("OAuth exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("OAuth profile has no usable email")]
    MissingEmail,

    #[error("OAuth provider has not verified the account email")]
    UnverifiedEmail,

    #[error("OAuth state storage failed: {0}")]
    State(#[from] crate::cache::CacheError),
}

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    GitHub,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::GitHub => "github",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::GitHub),
            other => Err(OAuthError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized profile returned by a provider exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthUser {
    pub provider: OAuthProvider,
    /// Provider-specific account id.
    pub id: String,
    pub email: String,
    /// Provider handle, when the provider has one (GitHub login).
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// OAuth provider client port.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the provider's authorization URL. When `state` is `None` a
    /// fresh one is generated. The state is remembered for validation on
    /// callback.
    async fn authorization_url(
        &self,
        provider: OAuthProvider,
        state: Option<&str>,
    ) -> Result<String, OAuthError>;

    /// Validate `state`, exchange `code`, and fetch the user's profile.
    async fn exchange(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
    ) -> Result<OAuthUser, OAuthError>;
}

/// Generate a cryptographic state parameter (CSRF token).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
