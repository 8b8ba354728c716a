//! HTTP OAuth client for Google and GitHub.
//!
//! Authorization-code flow: the state parameter is stored in the cache for
//! the configured TTL and consumed on callback; the code is exchanged at the
//! provider token endpoint and the profile fetched with the access token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{OAuthClient, OAuthError, OAuthProvider, OAuthUser, generate_state};
use crate::cache::KeyValueCache;
use crate::config::{OAuthConfig, OAuthProviderConfig};

const USER_AGENT: &str = "DSAGrind-Auth/0.1";

/// Endpoints and scopes for one provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// GitHub only: list of addresses, used when the profile email is private.
    pub emails_url: Option<String>,
    pub scopes: &'static str,
}

impl ProviderEndpoints {
    pub fn defaults(provider: OAuthProvider) -> Self {
        match provider {
            OAuthProvider::Google => Self {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
                token_url: "https://oauth2.googleapis.com/token".into(),
                userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
                emails_url: None,
                scopes: "openid email profile",
            },
            OAuthProvider::GitHub => Self {
                authorize_url: "https://github.com/login/oauth/authorize".into(),
                token_url: "https://github.com/login/oauth/access_token".into(),
                userinfo_url: "https://api.github.com/user".into(),
                emails_url: Some("https://api.github.com/user/emails".into()),
                scopes: "read:user user:email",
            },
        }
    }
}

/// Token endpoint response (both providers return at least this).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    #[serde(alias = "email_verified")]
    verified_email: Option<bool>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUserInfo {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// OAuth client backed by reqwest.
pub struct HttpOAuthClient {
    config: OAuthConfig,
    cache: Arc<dyn KeyValueCache>,
    client: reqwest::Client,
    google: ProviderEndpoints,
    github: ProviderEndpoints,
}

impl HttpOAuthClient {
    pub fn new(config: OAuthConfig, cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            config,
            cache,
            client: reqwest::Client::new(),
            google: ProviderEndpoints::defaults(OAuthProvider::Google),
            github: ProviderEndpoints::defaults(OAuthProvider::GitHub),
        }
    }

    /// Override one provider's endpoints.
    pub fn with_endpoints(mut self, provider: OAuthProvider, endpoints: ProviderEndpoints) -> Self {
        match provider {
            OAuthProvider::Google => self.google = endpoints,
            OAuthProvider::GitHub => self.github = endpoints,
        }
        self
    }

    fn endpoints(&self, provider: OAuthProvider) -> &ProviderEndpoints {
        match provider {
            OAuthProvider::Google => &self.google,
            OAuthProvider::GitHub => &self.github,
        }
    }

    fn credentials(&self, provider: OAuthProvider) -> Result<&OAuthProviderConfig, OAuthError> {
        self.config
            .provider(provider)
            .ok_or(OAuthError::NotConfigured(provider))
    }

    fn state_key(state: &str) -> String {
        format!("oauth_state:{state}")
    }

    /// Consume the stored state and check it was issued for `provider`.
    async fn consume_state(&self, provider: OAuthProvider, state: &str) -> Result<(), OAuthError> {
        match self.cache.take(&Self::state_key(state)).await? {
            Some(stored) if stored == provider.as_str() => Ok(()),
            Some(stored) => {
                warn!(expected = %provider, stored = %stored, "OAuth state issued for another provider");
                Err(OAuthError::InvalidState)
            }
            None => Err(OAuthError::InvalidState),
        }
    }

    async fn exchange_code(
        &self,
        provider: OAuthProvider,
        code: &str,
    ) -> Result<String, OAuthError> {
        let creds = self.credentials(provider)?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("redirect_uri", creds.redirect_uri.as_str()),
        ];

        let resp = self
            .client
            .post(&self.endpoints(provider).token_url)
            .header("accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("token exchange failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::ExchangeFailed(format!(
                "token exchange HTTP {status}: {body}"
            )));
        }

        let token = resp
            .json::<TokenResponse>()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("token response parse error: {e}")))?;

        match (token.access_token, token.error) {
            (Some(access_token), None) => Ok(access_token),
            (_, Some(error)) => Err(OAuthError::ExchangeFailed(format!(
                "{error}: {}",
                token.error_description.unwrap_or_default()
            ))),
            (None, None) => Err(OAuthError::ExchangeFailed(
                "token response without access_token".into(),
            )),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("user-agent", USER_AGENT)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("profile request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(OAuthError::ExchangeFailed(format!(
                "profile request HTTP {status}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("profile parse error: {e}")))
    }

    async fn fetch_user(
        &self,
        provider: OAuthProvider,
        access_token: &str,
    ) -> Result<OAuthUser, OAuthError> {
        let endpoints = self.endpoints(provider);
        match provider {
            OAuthProvider::Google => {
                let info: GoogleUserInfo =
                    self.get_json(&endpoints.userinfo_url, access_token).await?;
                google_user(info)
            }
            OAuthProvider::GitHub => {
                let info: GitHubUserInfo =
                    self.get_json(&endpoints.userinfo_url, access_token).await?;
                let emails = match (&info.email, &endpoints.emails_url) {
                    (None, Some(url)) => self.get_json::<Vec<GitHubEmail>>(url, access_token).await?,
                    _ => Vec::new(),
                };
                github_user(info, &emails)
            }
        }
    }
}

fn google_user(info: GoogleUserInfo) -> Result<OAuthUser, OAuthError> {
    let email = info.email.ok_or(OAuthError::MissingEmail)?;
    if info.verified_email != Some(true) {
        return Err(OAuthError::UnverifiedEmail);
    }
    Ok(OAuthUser {
        provider: OAuthProvider::Google,
        id: info.id,
        email,
        username: None,
        first_name: info.given_name,
        last_name: info.family_name,
        avatar_url: info.picture,
    })
}

fn github_user(info: GitHubUserInfo, emails: &[GitHubEmail]) -> Result<OAuthUser, OAuthError> {
    let email = info
        .email
        .or_else(|| {
            emails
                .iter()
                .find(|e| e.primary && e.verified)
                .or_else(|| emails.iter().find(|e| e.verified))
                .map(|e| e.email.clone())
        })
        .ok_or(OAuthError::MissingEmail)?;
    let (first_name, last_name) = match info.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => match name.split_once(' ') {
            Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
            None => (Some(name.to_string()), None),
        },
        _ => (None, None),
    };
    Ok(OAuthUser {
        provider: OAuthProvider::GitHub,
        id: info.id.to_string(),
        email,
        username: Some(info.login),
        first_name,
        last_name,
        avatar_url: info.avatar_url,
    })
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    async fn authorization_url(
        &self,
        provider: OAuthProvider,
        state: Option<&str>,
    ) -> Result<String, OAuthError> {
        let creds = self.credentials(provider)?;
        let endpoints = self.endpoints(provider);
        let state = state.map(str::to_string).unwrap_or_else(generate_state);

        let mut url = Url::parse(&endpoints.authorize_url)
            .map_err(|e| OAuthError::ExchangeFailed(format!("bad authorize url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &creds.client_id)
                .append_pair("redirect_uri", &creds.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", endpoints.scopes)
                .append_pair("state", &state);
            if provider == OAuthProvider::Google {
                query
                    .append_pair("access_type", "offline")
                    .append_pair("prompt", "select_account");
            }
        }

        self.cache
            .set(
                &Self::state_key(&state),
                provider.as_str().to_string(),
                self.config.state_ttl,
            )
            .await?;
        debug!(%provider, "issued OAuth authorization url");
        Ok(url.to_string())
    }

    async fn exchange(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
    ) -> Result<OAuthUser, OAuthError> {
        self.consume_state(provider, state).await?;
        let access_token = self.exchange_code(provider, code).await?;
        self.fetch_user(provider, &access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn client() -> HttpOAuthClient {
        let config = OAuthConfig::new()
            .with_provider(
                OAuthProvider::Google,
                OAuthProviderConfig {
                    client_id: "google-client".into(),
                    client_secret: "google-secret".into(),
                    redirect_uri: "http://localhost:5173/auth/google/callback".into(),
                },
            )
            .with_provider(
                OAuthProvider::GitHub,
                OAuthProviderConfig {
                    client_id: "gh-client".into(),
                    client_secret: "gh-secret".into(),
                    redirect_uri: "http://localhost:5173/auth/github/callback".into(),
                },
            );
        HttpOAuthClient::new(config, Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn authorization_url_carries_client_and_state() {
        let c = client();
        let url = c
            .authorization_url(OAuthProvider::GitHub, Some("st-1"))
            .await
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("github.com"));
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "gh-client");
        assert_eq!(pairs["state"], "st-1");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(
            pairs["redirect_uri"],
            "http://localhost:5173/auth/github/callback"
        );
    }

    #[tokio::test]
    async fn authorization_url_generates_state_when_missing() {
        let c = client();
        let url = c
            .authorization_url(OAuthProvider::Google, None)
            .await
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let state = parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(state.len() >= 20);
        assert!(
            c.cache
                .get(&HttpOAuthClient::state_key(&state))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn unknown_state_is_rejected_before_network() {
        let c = client();
        let err = c
            .exchange(OAuthProvider::Google, "code", "never-issued")
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidState));
    }

    #[tokio::test]
    async fn state_for_other_provider_is_rejected_and_consumed() {
        let c = client();
        c.authorization_url(OAuthProvider::GitHub, Some("st-2"))
            .await
            .unwrap();
        assert!(matches!(
            c.consume_state(OAuthProvider::Google, "st-2").await,
            Err(OAuthError::InvalidState)
        ));
        assert!(matches!(
            c.consume_state(OAuthProvider::GitHub, "st-2").await,
            Err(OAuthError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let c = client();
        c.authorization_url(OAuthProvider::Google, Some("st-3"))
            .await
            .unwrap();
        assert!(c.consume_state(OAuthProvider::Google, "st-3").await.is_ok());
        assert!(c.consume_state(OAuthProvider::Google, "st-3").await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_provider_fails() {
        let c = HttpOAuthClient::new(OAuthConfig::new(), Arc::new(MemoryCache::new()));
        assert!(matches!(
            c.authorization_url(OAuthProvider::Google, None).await,
            Err(OAuthError::NotConfigured(OAuthProvider::Google))
        ));
    }

    #[test]
    fn github_user_falls_back_to_primary_verified_email() {
        let info = GitHubUserInfo {
            id: 42,
            login: "alice".into(),
            name: Some("Alice Liddell".into()),
            email: None,
            avatar_url: None,
        };
        let emails = vec![
            GitHubEmail {
                email: "old@x.com".into(),
                primary: false,
                verified: true,
            },
            GitHubEmail {
                email: "alice@x.com".into(),
                primary: true,
                verified: true,
            },
        ];
        let user = github_user(info, &emails).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.first_name.as_deref(), Some("Alice"));
        assert_eq!(user.last_name.as_deref(), Some("Liddell"));
    }

    #[test]
    fn github_user_without_email_fails() {
        let info = GitHubUserInfo {
            id: 1,
            login: "ghost".into(),
            name: None,
            email: None,
            avatar_url: None,
        };
        assert!(matches!(
            github_user(info, &[]),
            Err(OAuthError::MissingEmail)
        ));
    }

    #[test]
    fn google_user_maps_names() {
        let info: GoogleUserInfo = serde_json::from_value(serde_json::json!({
            "id": "g-1",
            "email": "bob@gmail.com",
            "verified_email": true,
            "given_name": "Bob",
            "family_name": "Builder",
            "picture": "http://img"
        }))
        .unwrap();
        let user = google_user(info).unwrap();
        assert_eq!(user.provider, OAuthProvider::Google);
        assert_eq!(user.first_name.as_deref(), Some("Bob"));
        assert_eq!(user.avatar_url.as_deref(), Some("http://img"));
    }

    #[test]
    fn google_user_requires_verified_email() {
        for verified in [serde_json::json!(false), serde_json::Value::Null] {
            let info: GoogleUserInfo = serde_json::from_value(serde_json::json!({
                "id": "g-2",
                "email": "victim@example.com",
                "verified_email": verified,
            }))
            .unwrap();
            assert!(matches!(
                google_user(info),
                Err(OAuthError::UnverifiedEmail)
            ));
        }

        let info: GoogleUserInfo = serde_json::from_value(serde_json::json!({
            "id": "g-3",
            "email": "bob@gmail.com",
            "email_verified": true,
        }))
        .unwrap();
        assert_eq!(google_user(info).unwrap().email, "bob@gmail.com");
    }
}
