//! Authentication and session lifecycle.
//!
//! Provides password hashing, JWT management, login throttling, and the
//! session service that composes them with the store, cache, email, event,
//! and OAuth collaborators.

pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod tokens;

use thiserror::Error;

use crate::cache::CacheError;
use crate::email::EmailError;
use crate::store::StoreError;

pub use session::{Collaborators, Registration, SessionService};

/// Authentication errors.
///
/// Authorization failures and soft "nothing to do" outcomes are distinct
/// variants so callers can map them to different responses; see
/// [`AuthError::is_soft`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Refresh token was already rotated")]
    StaleToken,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("OAuth login failed: {0}")]
    OAuthFailed(String),

    #[error("Unsupported OAuth provider: {0}")]
    UnsupportedProvider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Current password does not match")]
    PasswordMismatch,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Email error: {0}")]
    Email(#[from] EmailError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Soft outcomes report "not applied" rather than an authorization
    /// failure; HTTP callers answer them with `success: false`.
    pub fn is_soft(&self) -> bool {
        matches!(self, AuthError::NotFound(_) | AuthError::PasswordMismatch)
    }
}
