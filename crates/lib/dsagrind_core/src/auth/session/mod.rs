//! Session service: every credential-affecting operation.
//!
//! Composes the password hasher, token signer, and rate limiter with the
//! user store, cache, event sink, email sender, and OAuth client. Each
//! operation awaits its collaborators one after another; dropping the
//! returned future cancels whichever call is in flight.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::AuthError;
use super::jwt::TokenSigner;
use super::password::PasswordHasher;
use super::rate_limit::RateLimiter;
use super::tokens::{digest, generate_refresh_token, generate_url_token};
use crate::cache::KeyValueCache;
use crate::config::{SessionConfig, to_chrono};
use crate::email::{EmailSender, EmailTemplate};
use crate::events::{AuthEvent, EventSink};
use crate::models::auth::{
    AuthSession, NewUser, OAuthLinks, Profile, ProfileUpdate, RefreshToken, Role, TokenClaims,
    User, UserView,
};
use crate::oauth::{OAuthClient, OAuthError, OAuthProvider, OAuthUser};
use crate::store::{StoreError, UniqueField, UserStore};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 32;
/// Upper bound on numeric suffixes tried for a generated username.
const MAX_USERNAME_SUFFIX: u32 = 1000;

/// Input for [`SessionService::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// External collaborators of the session service.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn UserStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub events: Arc<dyn EventSink>,
    pub email: Arc<dyn EmailSender>,
    pub oauth: Arc<dyn OAuthClient>,
}

/// Orchestrates login, registration, token lifecycle, email verification,
/// password reset/change, and OAuth sign-in.
pub struct SessionService {
    config: SessionConfig,
    store: Arc<dyn UserStore>,
    cache: Arc<dyn KeyValueCache>,
    events: Arc<dyn EventSink>,
    email: Arc<dyn EmailSender>,
    oauth: Arc<dyn OAuthClient>,
    signer: TokenSigner,
    limiter: RateLimiter,
    hasher: PasswordHasher,
}

impl SessionService {
    pub fn new(config: SessionConfig, deps: Collaborators) -> Self {
        Self {
            signer: TokenSigner::new(&config),
            limiter: RateLimiter::new(deps.cache.clone()),
            hasher: PasswordHasher::new(config.bcrypt_cost),
            config,
            store: deps.store,
            cache: deps.cache,
            events: deps.events,
            email: deps.email,
            oauth: deps.oauth,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    // -----------------------------------------------------------------------
    // Credential flows
    // -----------------------------------------------------------------------

    /// Authenticate with email + password.
    ///
    /// Failed attempts count against `login_attempts:<email>`; once the
    /// limit is reached every attempt is refused until the window closes.
    /// A successful password check clears the counter.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip: &str,
    ) -> Result<AuthSession, AuthError> {
        let key = RateLimiter::login_key(email);
        if let Some(remaining) = self
            .limiter
            .blocked_for(&key, self.config.login_attempt_limit)
            .await?
        {
            warn!(email, ip, "login throttled");
            return Err(AuthError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        let user = self.store.find_by_email(email).await?;
        let matched = user.as_ref().is_some_and(|u| {
            u.password_hash
                .as_deref()
                .is_some_and(|hash| self.hasher.verify(password, hash))
        });
        let Some(mut user) = user.filter(|_| matched) else {
            let decision = self
                .limiter
                .check_and_increment(
                    &key,
                    self.config.login_attempt_limit,
                    self.config.login_attempt_window,
                )
                .await?;
            info!(email, ip, attempts = decision.count, "login failed");
            return Err(AuthError::InvalidCredentials);
        };

        self.limiter.reset(&key).await?;

        if !user.email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let now = Utc::now();
        self.store.record_login(&user.id, now).await?;
        user.last_login_at = Some(now);

        let session = self.open_session(&user, ip).await?;
        self.publish(AuthEvent::UserLoggedIn {
            user_id: user.id.clone(),
            method: "password".into(),
            ip: ip.to_string(),
        })
        .await;
        info!(user_id = %user.id, ip, "user logged in");
        Ok(session)
    }

    /// Create an unverified account and open a session for it.
    pub async fn register(
        &self,
        registration: Registration,
        ip: &str,
    ) -> Result<AuthSession, AuthError> {
        validate_registration(&registration)?;

        if self
            .store
            .find_by_email(&registration.email)
            .await?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }
        if self
            .store
            .find_by_username(&registration.username)
            .await?
            .is_some()
        {
            return Err(AuthError::UsernameTaken);
        }

        let password_hash = self.hasher.hash(&registration.password)?;
        let verification_token = generate_url_token();

        let user = self
            .store
            .create(NewUser {
                username: registration.username,
                email: registration.email,
                password_hash: Some(password_hash),
                role: Role::User,
                email_verified: false,
                email_verification_token: Some(digest(&verification_token)),
                oauth: OAuthLinks::default(),
                profile: Profile {
                    first_name: registration.first_name,
                    last_name: registration.last_name,
                    ..Profile::default()
                },
            })
            .await
            .map_err(conflict_error)?;

        info!(user_id = %user.id, username = %user.username, ip, "user registered");
        self.publish(AuthEvent::UserRegistered {
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        })
        .await;

        self.email
            .send(
                &user.email,
                EmailTemplate::Verification {
                    username: user.username.clone(),
                    link: self.link("verify-email", &verification_token),
                },
            )
            .await?;

        self.open_session(&user, ip).await
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// The presented token is revoked and points at its replacement. If a
    /// concurrent call rotated it first, this one fails with
    /// [`AuthError::StaleToken`].
    pub async fn refresh_token(&self, token: &str, ip: &str) -> Result<AuthSession, AuthError> {
        let token_hash = digest(token);
        let user = self
            .store
            .find_by_refresh_token(&token_hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();
        let active = user
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == token_hash && t.is_active_at(now));
        if !active {
            debug!(user_id = %user.id, "refresh with inactive token");
            return Err(AuthError::InvalidToken);
        }

        let (refresh_token, record) = self.new_refresh_token(ip);
        let rotated = self
            .store
            .rotate_refresh_token(
                &token_hash,
                record,
                ip,
                self.config.max_active_refresh_tokens,
            )
            .await?;
        if !rotated {
            warn!(user_id = %user.id, ip, "refresh token lost rotation race");
            return Err(AuthError::StaleToken);
        }

        let access = self.signer.issue_access_token(&user)?;
        debug!(user_id = %user.id, "refresh token rotated");
        Ok(AuthSession {
            access_token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            user: user.view(),
        })
    }

    /// Revoke one refresh token. Unknown or inactive tokens are
    /// [`AuthError::NotFound`].
    pub async fn revoke_token(&self, token: &str, ip: &str) -> Result<(), AuthError> {
        let token_hash = digest(token);
        let Some(user) = self.store.find_by_refresh_token(&token_hash).await? else {
            return Err(AuthError::NotFound("refresh token".into()));
        };
        if !self.store.revoke_refresh_token(&token_hash, ip).await? {
            return Err(AuthError::NotFound("refresh token".into()));
        }

        info!(user_id = %user.id, ip, "refresh token revoked");
        self.publish(AuthEvent::TokenRevoked {
            user_id: user.id.clone(),
            ip: ip.to_string(),
        })
        .await;
        self.invalidate_user(&user.id).await;
        Ok(())
    }

    /// Revoke every active refresh token of a user. Returns how many were
    /// revoked.
    pub async fn revoke_all_tokens(&self, user_id: &str, ip: &str) -> Result<usize, AuthError> {
        let revoked = self
            .store
            .revoke_all_refresh_tokens(user_id, ip)
            .await
            .map_err(not_found)?;

        info!(user_id, ip, revoked, "all refresh tokens revoked");
        self.publish(AuthEvent::AllTokensRevoked {
            user_id: user_id.to_string(),
            ip: ip.to_string(),
        })
        .await;
        self.invalidate_user(user_id).await;
        Ok(revoked)
    }

    // -----------------------------------------------------------------------
    // Email verification
    // -----------------------------------------------------------------------

    /// Consume a verification token and mark the owner's email verified.
    pub async fn verify_email(&self, token: &str) -> Result<(), AuthError> {
        let Some(user) = self
            .store
            .find_by_verification_token(&digest(token))
            .await?
        else {
            return Err(AuthError::NotFound("verification token".into()));
        };

        self.store.mark_email_verified(&user.id).await?;
        info!(user_id = %user.id, "email verified");
        self.publish(AuthEvent::EmailVerified {
            user_id: user.id.clone(),
        })
        .await;
        self.invalidate_user(&user.id).await;

        // The account is already verified; a lost welcome email is not
        // worth failing the request over.
        if let Err(e) = self
            .email
            .send(
                &user.email,
                EmailTemplate::Welcome {
                    username: user.username.clone(),
                },
            )
            .await
        {
            warn!(user_id = %user.id, error = %e, "welcome email failed");
        }
        Ok(())
    }

    /// Issue a fresh verification token, replacing any pending one.
    pub async fn resend_email_verification(&self, email: &str) -> Result<(), AuthError> {
        let user = match self.store.find_by_email(email).await? {
            Some(user) if !user.email_verified => user,
            _ => return Err(AuthError::NotFound("unverified account".into())),
        };

        let token = generate_url_token();
        self.store
            .set_verification_token(&user.id, Some(&digest(&token)))
            .await?;
        self.email
            .send(
                &user.email,
                EmailTemplate::Verification {
                    username: user.username.clone(),
                    link: self.link("verify-email", &token),
                },
            )
            .await?;
        debug!(user_id = %user.id, "verification email resent");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Password reset / change
    // -----------------------------------------------------------------------

    /// Start a password reset. Succeeds whether or not `email` is known.
    pub async fn forgot_password(&self, email: &str, ip: &str) -> Result<(), AuthError> {
        let Some(user) = self.store.find_by_email(email).await? else {
            debug!(ip, "password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_url_token();
        let expires_at = Utc::now() + to_chrono(self.config.password_reset_ttl);
        self.store
            .set_password_reset(&user.id, &digest(&token), expires_at)
            .await?;
        self.email
            .send(
                &user.email,
                EmailTemplate::PasswordReset {
                    username: user.username.clone(),
                    link: self.link("reset-password", &token),
                },
            )
            .await?;

        info!(user_id = %user.id, ip, "password reset requested");
        self.publish(AuthEvent::PasswordResetRequested {
            user_id: user.id.clone(),
            ip: ip.to_string(),
        })
        .await;
        Ok(())
    }

    /// Set a new password with a reset token, then revoke every session.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        ip: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        let Some(user) = self.store.find_by_reset_token(&digest(token)).await? else {
            return Err(AuthError::NotFound("reset token".into()));
        };
        let unexpired = user
            .password_reset_expires_at
            .is_some_and(|at| Utc::now() < at);
        if !unexpired {
            debug!(user_id = %user.id, "expired reset token presented");
            return Err(AuthError::NotFound("reset token".into()));
        }

        let password_hash = self.hasher.hash(new_password)?;
        self.store.set_password_hash(&user.id, &password_hash).await?;
        let revoked = self.store.revoke_all_refresh_tokens(&user.id, ip).await?;

        info!(user_id = %user.id, ip, revoked, "password reset");
        self.publish(AuthEvent::PasswordReset {
            user_id: user.id.clone(),
            ip: ip.to_string(),
        })
        .await;
        self.invalidate_user(&user.id).await;
        Ok(())
    }

    /// Change the password of a signed-in user. Existing sessions stay
    /// valid.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user".into()))?;

        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthError::PasswordMismatch);
        };
        if !self.hasher.verify(current_password, hash) {
            return Err(AuthError::PasswordMismatch);
        }
        validate_password(new_password)?;

        let password_hash = self.hasher.hash(new_password)?;
        self.store.set_password_hash(&user.id, &password_hash).await?;
        info!(user_id, "password changed");
        self.invalidate_user(user_id).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // OAuth
    // -----------------------------------------------------------------------

    /// Authorization URL for `provider`; the client remembers `state`.
    pub async fn generate_oauth_url(
        &self,
        provider: OAuthProvider,
        state: Option<&str>,
    ) -> Result<String, AuthError> {
        self.oauth
            .authorization_url(provider, state)
            .await
            .map_err(oauth_error)
    }

    /// Complete a provider sign-in: find the linked account, link by email,
    /// or create a new one, then open a session.
    pub async fn oauth_login(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
        ip: &str,
    ) -> Result<AuthSession, AuthError> {
        let profile = self
            .oauth
            .exchange(provider, code, state)
            .await
            .map_err(oauth_error)?;

        let mut user = self.resolve_oauth_user(&profile).await?;

        let now = Utc::now();
        self.store.record_login(&user.id, now).await?;
        user.last_login_at = Some(now);

        let session = self.open_session(&user, ip).await?;
        self.publish(AuthEvent::UserLoggedIn {
            user_id: user.id.clone(),
            method: provider.as_str().to_string(),
            ip: ip.to_string(),
        })
        .await;
        info!(user_id = %user.id, %provider, ip, "user logged in via oauth");
        Ok(session)
    }

    async fn resolve_oauth_user(&self, profile: &OAuthUser) -> Result<User, AuthError> {
        let provider = profile.provider;
        if let Some(user) = self.store.find_by_oauth_id(provider, &profile.id).await? {
            return Ok(user);
        }

        if let Some(existing) = self.store.find_by_email(&profile.email).await? {
            self.store
                .link_oauth(&existing.id, provider, &profile.id)
                .await
                .map_err(conflict_error)?;
            info!(user_id = %existing.id, %provider, "oauth account linked");
            self.publish(AuthEvent::OAuthAccountLinked {
                user_id: existing.id.clone(),
                provider: provider.as_str().to_string(),
            })
            .await;
            self.invalidate_user(&existing.id).await;
            return self
                .store
                .find_by_id(&existing.id)
                .await?
                .ok_or_else(|| AuthError::Internal("linked user vanished".into()));
        }

        self.create_oauth_user(profile).await
    }

    /// Create an account for a first-time OAuth user, suffixing the
    /// username (`alice`, `alice1`, `alice2`, ...) until one is free.
    async fn create_oauth_user(&self, profile: &OAuthUser) -> Result<User, AuthError> {
        let base = base_username(profile);
        let mut oauth = OAuthLinks::default();
        match profile.provider {
            OAuthProvider::Google => oauth.google_id = Some(profile.id.clone()),
            OAuthProvider::GitHub => oauth.github_id = Some(profile.id.clone()),
        }

        for suffix in 0..MAX_USERNAME_SUFFIX {
            let candidate = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}{suffix}")
            };
            if self.store.find_by_username(&candidate).await?.is_some() {
                continue;
            }

            let created = self
                .store
                .create(NewUser {
                    username: candidate,
                    email: profile.email.clone(),
                    password_hash: None,
                    role: Role::User,
                    email_verified: true,
                    email_verification_token: None,
                    oauth: oauth.clone(),
                    profile: Profile {
                        first_name: profile.first_name.clone(),
                        last_name: profile.last_name.clone(),
                        avatar_url: profile.avatar_url.clone(),
                        ..Profile::default()
                    },
                })
                .await;
            match created {
                Ok(user) => {
                    info!(user_id = %user.id, username = %user.username, provider = %profile.provider, "oauth user created");
                    self.publish(AuthEvent::UserRegistered {
                        user_id: user.id.clone(),
                        username: user.username.clone(),
                        email: user.email.clone(),
                    })
                    .await;
                    return Ok(user);
                }
                // Taken between the check and the insert.
                Err(StoreError::Conflict(UniqueField::Username)) => continue,
                Err(e) => return Err(conflict_error(e)),
            }
        }
        Err(AuthError::Internal(format!(
            "no free username derived from {base}"
        )))
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// User projection, served from the cache when present.
    pub async fn get_user(&self, user_id: &str) -> Result<UserView, AuthError> {
        let key = user_cache_key(user_id);
        if let Some(cached) = self.cache.get(&key).await? {
            match serde_json::from_str::<UserView>(&cached) {
                Ok(view) => return Ok(view),
                Err(e) => debug!(user_id, error = %e, "discarding unreadable cached user"),
            }
        }

        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user".into()))?;
        let view = user.view();
        let json = serde_json::to_string(&view).map_err(|e| AuthError::Internal(e.to_string()))?;
        self.cache
            .set(&key, json, self.config.user_cache_ttl)
            .await?;
        Ok(view)
    }

    /// Apply a partial profile update and return the refreshed projection.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> Result<UserView, AuthError> {
        self.store
            .update_profile(user_id, update)
            .await
            .map_err(not_found)?;
        self.invalidate_user(user_id).await;
        self.get_user(user_id).await
    }

    /// Claims of a valid access token.
    pub fn validate_token(&self, token: &str) -> Option<TokenClaims> {
        self.signer.validate(token)
    }

    pub fn user_id_from_token(&self, token: &str) -> Option<String> {
        self.signer.user_id(token)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn new_refresh_token(&self, ip: &str) -> (String, RefreshToken) {
        let token = generate_refresh_token();
        let now = Utc::now();
        let record = RefreshToken {
            token_hash: digest(&token),
            created_at: now,
            expires_at: now + to_chrono(self.config.refresh_token_ttl),
            created_by_ip: ip.to_string(),
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by: None,
        };
        (token, record)
    }

    /// Issue an access token and store a fresh refresh token for `user`.
    async fn open_session(&self, user: &User, ip: &str) -> Result<AuthSession, AuthError> {
        let access = self.signer.issue_access_token(user)?;
        let (refresh_token, record) = self.new_refresh_token(ip);
        self.store
            .add_refresh_token(&user.id, record, self.config.max_active_refresh_tokens)
            .await?;
        Ok(AuthSession {
            access_token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            user: user.view(),
        })
    }

    async fn publish(&self, event: AuthEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(topic = event.topic(), error = %e, "event publish failed");
        }
    }

    async fn invalidate_user(&self, user_id: &str) {
        if let Err(e) = self.cache.delete(&user_cache_key(user_id)).await {
            warn!(user_id, error = %e, "user cache invalidation failed");
        }
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!(
            "{}/{path}?token={token}",
            self.config.app_base_url.trim_end_matches('/')
        )
    }
}

fn user_cache_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_registration(registration: &Registration) -> Result<(), AuthError> {
    let username = registration.username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(AuthError::ValidationError(format!(
            "Username must be 1 to {MAX_USERNAME_LEN} characters"
        )));
    }
    if username != registration.username {
        return Err(AuthError::ValidationError(
            "Username must not start or end with whitespace".into(),
        ));
    }
    let email = registration.email.as_str();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(AuthError::ValidationError("Invalid email address".into()));
    }
    validate_password(&registration.password)
}

/// Starting point for an OAuth user's username: the provider handle, else
/// the email's local part, reduced to `[A-Za-z0-9_.-]`.
fn base_username(profile: &OAuthUser) -> String {
    let raw = profile
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| profile.email.split('@').next().unwrap_or_default());
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(MAX_USERNAME_LEN - 4)
        .collect();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

fn conflict_error(e: StoreError) -> AuthError {
    match e {
        StoreError::Conflict(UniqueField::Email) => AuthError::EmailTaken,
        StoreError::Conflict(UniqueField::Username) => AuthError::UsernameTaken,
        StoreError::Conflict(UniqueField::OAuthId) => {
            AuthError::OAuthFailed("external account already linked".into())
        }
        other => AuthError::Store(other),
    }
}

fn not_found(e: StoreError) -> AuthError {
    match e {
        StoreError::UserNotFound(_) => AuthError::NotFound("user".into()),
        other => AuthError::Store(other),
    }
}

fn oauth_error(e: OAuthError) -> AuthError {
    match e {
        OAuthError::UnsupportedProvider(p) => AuthError::UnsupportedProvider(p),
        OAuthError::NotConfigured(p) => AuthError::UnsupportedProvider(p.to_string()),
        OAuthError::State(e) => AuthError::Cache(e),
        other => {
            warn!(error = %other, "oauth exchange failed");
            AuthError::OAuthFailed(other.to_string())
        }
    }
}
