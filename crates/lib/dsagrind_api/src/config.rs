//! API server configuration.

use dsagrind_core::auth::jwt::resolve_jwt_secret;
use dsagrind_core::config::{OAuthConfig, OAuthProviderConfig, SessionConfig};
use dsagrind_core::email::BrevoEmailSender;
use dsagrind_core::oauth::OAuthProvider;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL; the in-memory store is used when unset.
    pub pg_connection_url: Option<String>,
    /// Mark auth cookies `Secure`.
    pub cookie_secure: bool,
    pub session: SessionConfig,
    pub oauth: OAuthConfig,
    /// Brevo delivery; email is logged instead when unset.
    pub brevo: Option<BrevoEmailSender>,
}

impl ApiConfig {
    /// Defaults around an explicit session config; nothing read from the
    /// environment.
    pub fn new(session: SessionConfig) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            pg_connection_url: None,
            cookie_secure: false,
            session,
            oauth: OAuthConfig::default(),
            brevo: None,
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default                          |
    /// |------------------------------|----------------------------------|
    /// | `BIND_ADDR`                  | `127.0.0.1:3100`                 |
    /// | `DATABASE_URL`               | unset (in-memory store)          |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file    |
    /// | `APP_BASE_URL`               | `http://localhost:5173`          |
    /// | `COOKIE_SECURE`              | `false`                          |
    /// | `GOOGLE_CLIENT_ID` etc.      | provider disabled                |
    /// | `GITHUB_CLIENT_ID` etc.      | provider disabled                |
    /// | `BREVO_API_KEY` etc.         | email logged, not sent           |
    pub fn from_env() -> Self {
        let mut session = SessionConfig::new(resolve_jwt_secret());
        if let Some(url) = env_var("APP_BASE_URL") {
            session.app_base_url = url;
        }

        let mut oauth = OAuthConfig::new();
        for (provider, prefix) in [
            (OAuthProvider::Google, "GOOGLE"),
            (OAuthProvider::GitHub, "GITHUB"),
        ] {
            if let Some(settings) = provider_from_env(prefix) {
                oauth = oauth.with_provider(provider, settings);
            }
        }

        Self {
            bind_addr: env_var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:3100".into()),
            pg_connection_url: env_var("DATABASE_URL"),
            cookie_secure: env_var("COOKIE_SECURE").is_some_and(|v| parse_flag(&v)),
            session,
            oauth,
            brevo: BrevoEmailSender::from_env(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn provider_from_env(prefix: &str) -> Option<OAuthProviderConfig> {
    Some(OAuthProviderConfig {
        client_id: env_var(&format!("{prefix}_CLIENT_ID"))?,
        client_secret: env_var(&format!("{prefix}_CLIENT_SECRET"))?,
        redirect_uri: env_var(&format!("{prefix}_REDIRECT_URI"))?,
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_truthy_values() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" YES "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn new_uses_memory_store_and_no_providers() {
        let config = ApiConfig::new(SessionConfig::new("s"));
        assert!(config.pg_connection_url.is_none());
        assert!(config.oauth.configured_providers().is_empty());
        assert!(!config.cookie_secure);
    }
}
