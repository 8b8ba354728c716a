//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! shapes in `dsagrind_api` (which use camelCase on the wire).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription plan carried in access-token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Premium,
}

impl SubscriptionPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Free => "free",
            SubscriptionPlan::Premium => "premium",
        }
    }
}

impl FromStr for SubscriptionPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionPlan::Free),
            "premium" => Ok(SubscriptionPlan::Premium),
            other => Err(format!("unknown subscription plan: {other}")),
        }
    }
}

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
}

/// Free-form profile sub-document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

/// Partial profile update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

impl Profile {
    /// Apply a partial update in place.
    pub fn apply(&mut self, update: ProfileUpdate) {
        if let Some(v) = update.first_name {
            self.first_name = Some(v);
        }
        if let Some(v) = update.last_name {
            self.last_name = Some(v);
        }
        if let Some(v) = update.avatar_url {
            self.avatar_url = Some(v);
        }
        if let Some(v) = update.bio {
            self.bio = Some(v);
        }
        if let Some(v) = update.location {
            self.location = Some(v);
        }
        if let Some(v) = update.website {
            self.website = Some(v);
        }
    }
}

/// External identities linked to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthLinks {
    pub google_id: Option<String>,
    pub github_id: Option<String>,
}

/// Refresh token record embedded in a user.
///
/// `token_hash` is the SHA-256 digest of the opaque value handed to the
/// client; the plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by_ip: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    /// Digest of the token that replaced this one on rotation.
    pub replaced_by: Option<String>,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Active ⇔ not revoked and not yet expired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn revoke(&mut self, at: DateTime<Utc>, ip: &str, replaced_by: Option<String>) {
        self.revoked_at = Some(at);
        self.revoked_by_ip = Some(ip.to_string());
        self.replaced_by = replaced_by;
    }
}

/// Drop active tokens beyond the `keep` most recent, newest first.
///
/// Revoked and expired records are left in place so rotation chains stay
/// readable.
pub fn prune_refresh_tokens(tokens: &mut Vec<RefreshToken>, keep: usize, now: DateTime<Utc>) {
    tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut active = 0;
    tokens.retain(|t| {
        if !t.is_active_at(now) {
            return true;
        }
        active += 1;
        active <= keep
    });
}

/// Domain user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    /// Absent for OAuth-only accounts.
    pub password_hash: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    /// Digest of the pending single-use verification token.
    pub email_verification_token: Option<String>,
    /// Digest of the pending single-use reset token.
    pub password_reset_token: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub refresh_tokens: Vec<RefreshToken>,
    pub oauth: OAuthLinks,
    pub profile: Profile,
    pub subscription: Subscription,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn active_refresh_tokens(&self) -> impl Iterator<Item = &RefreshToken> {
        let now = Utc::now();
        self.refresh_tokens
            .iter()
            .filter(move |t| t.is_active_at(now))
    }

    pub fn view(&self) -> UserView {
        UserView::from(self)
    }
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub email_verification_token: Option<String>,
    pub oauth: OAuthLinks,
    pub profile: Profile,
}

/// Public projection of a user: no credentials, no token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub profile: Profile,
    pub subscription: Subscription,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            email_verified: user.email_verified,
            profile: user.profile.clone(),
            subscription: user.subscription.clone(),
            has_password: user.password_hash.is_some(),
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject — user ID (standard JWT `sub` claim).
    pub sub: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub plan: SubscriptionPlan,
    pub subscription_status: SubscriptionStatus,
    /// Unique token id.
    pub jti: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Signed access token plus the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of every operation that opens a session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    /// Opaque refresh token plaintext; only shown to the client once.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserView,
}
