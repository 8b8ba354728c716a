//! User record store port.
//!
//! Token arguments named `*_hash` are SHA-256 digests from
//! [`crate::auth::tokens::digest`]; stores never see plaintext secrets.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{NewUser, ProfileUpdate, RefreshToken, User};
use crate::oauth::OAuthProvider;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Unique user attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
    OAuthId,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Duplicate {0:?}")]
    Conflict(UniqueField),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),
}

/// Persistence for user documents and their refresh tokens.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_verification_token(&self, token_hash: &str)
    -> Result<Option<User>, StoreError>;

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_oauth_id(
        &self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Owner of the refresh token with this digest (active or not).
    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<User>, StoreError>;

    /// Insert a user. Fails with [`StoreError::Conflict`] on a taken email,
    /// username, or OAuth id.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Append `token` and drop active tokens beyond the `keep` most recent.
    /// Revoked and expired records are kept.
    async fn add_refresh_token(
        &self,
        user_id: &str,
        token: RefreshToken,
        keep: usize,
    ) -> Result<(), StoreError>;

    /// Revoke `old_hash` in favour of `replacement`, then prune to `keep`.
    ///
    /// Conditional: applies only if the old token is still active at write
    /// time. Returns `false` when it was not (already rotated, revoked, or
    /// expired) and nothing was written.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshToken,
        ip: &str,
        keep: usize,
    ) -> Result<bool, StoreError>;

    /// Revoke one token. Returns `false` if no active token matched.
    async fn revoke_refresh_token(&self, token_hash: &str, ip: &str) -> Result<bool, StoreError>;

    /// Revoke every active token of a user, returning how many were revoked.
    async fn revoke_all_refresh_tokens(&self, user_id: &str, ip: &str)
    -> Result<usize, StoreError>;

    async fn set_verification_token(
        &self,
        user_id: &str,
        token_hash: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Set the verified flag and clear the verification token.
    async fn mark_email_verified(&self, user_id: &str) -> Result<(), StoreError>;

    async fn set_password_reset(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Store a new password hash and clear any pending reset token.
    async fn set_password_hash(&self, user_id: &str, password_hash: &str)
    -> Result<(), StoreError>;

    /// Attach an external identity and mark the email verified.
    async fn link_oauth(
        &self,
        user_id: &str,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<(), StoreError>;

    async fn update_profile(&self, user_id: &str, update: ProfileUpdate)
    -> Result<User, StoreError>;
}
