//! Session and OAuth configuration.
//!
//! Everything here is passed explicitly into constructors; nothing reads
//! ambient state after startup.

use std::collections::HashMap;
use std::time::Duration;

use crate::oauth::OAuthProvider;

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Number of active refresh tokens retained per user.
pub const DEFAULT_MAX_ACTIVE_REFRESH_TOKENS: usize = 5;

/// Failed logins tolerated per window before the key is blocked.
pub const DEFAULT_LOGIN_ATTEMPT_LIMIT: u64 = 5;

/// Login throttling window: 15 minutes.
pub const DEFAULT_LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Password reset token lifetime: 1 hour.
pub const DEFAULT_PASSWORD_RESET_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached user projection lifetime: 30 minutes.
pub const DEFAULT_USER_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// OAuth anti-CSRF state lifetime: 10 minutes.
pub const DEFAULT_OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Clock skew tolerated when validating `exp`.
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

/// bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Settings for the session service and its token signer.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub max_active_refresh_tokens: usize,
    pub login_attempt_limit: u64,
    pub login_attempt_window: Duration,
    pub password_reset_ttl: Duration,
    pub user_cache_ttl: Duration,
    pub leeway_secs: u64,
    pub bcrypt_cost: u32,
    /// Frontend origin used to build links in outgoing email.
    pub app_base_url: String,
}

impl SessionConfig {
    /// Defaults for everything but the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: "dsagrind".into(),
            audience: "dsagrind-app".into(),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            max_active_refresh_tokens: DEFAULT_MAX_ACTIVE_REFRESH_TOKENS,
            login_attempt_limit: DEFAULT_LOGIN_ATTEMPT_LIMIT,
            login_attempt_window: DEFAULT_LOGIN_ATTEMPT_WINDOW,
            password_reset_ttl: DEFAULT_PASSWORD_RESET_TTL,
            user_cache_ttl: DEFAULT_USER_CACHE_TTL,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            app_base_url: "http://localhost:5173".into(),
        }
    }
}

/// Client credentials registered with one OAuth provider.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Per-provider OAuth settings.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    providers: HashMap<OAuthProvider, OAuthProviderConfig>,
    pub state_ttl: Duration,
}

impl OAuthConfig {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            state_ttl: DEFAULT_OAUTH_STATE_TTL,
        }
    }

    /// Register credentials for a provider.
    pub fn with_provider(mut self, provider: OAuthProvider, config: OAuthProviderConfig) -> Self {
        self.providers.insert(provider, config);
        self
    }

    /// Credentials for `provider`, if it is configured.
    pub fn provider(&self, provider: OAuthProvider) -> Option<&OAuthProviderConfig> {
        self.providers.get(&provider)
    }

    pub fn configured_providers(&self) -> Vec<OAuthProvider> {
        let mut providers: Vec<_> = self.providers.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a std duration into a chrono duration for timestamp arithmetic.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}
