//! Process-local user store.
//!
//! Keeps a secondary index from refresh-token digest to user id so token
//! lookups do not scan every user.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{StoreError, UniqueField, UserStore};
use crate::models::auth::{
    NewUser, ProfileUpdate, RefreshToken, Subscription, User, prune_refresh_tokens,
};
use crate::oauth::OAuthProvider;
use crate::uuid::uuidv7;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, User>,
    /// Refresh-token digest → user id.
    refresh_index: HashMap<String, String>,
}

impl Inner {
    fn find(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|u| pred(*u)).cloned()
    }

    fn user_mut(&mut self, user_id: &str) -> Result<&mut User, StoreError> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }

    /// Bring the index in line with the user's current token list.
    fn reindex(&mut self, user_id: &str) {
        self.refresh_index.retain(|_, owner| owner != user_id);
        if let Some(user) = self.users.get(user_id) {
            for token in &user.refresh_tokens {
                self.refresh_index
                    .insert(token.token_hash.clone(), user_id.to_string());
            }
        }
    }
}

/// In-memory [`UserStore`].
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.find(|u| u.email == email))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.find(|u| u.username == username))
    }

    async fn find_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .find(|u| u.email_verification_token.as_deref() == Some(token_hash)))
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .find(|u| u.password_reset_token.as_deref() == Some(token_hash)))
    }

    async fn find_by_oauth_id(
        &self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.find(|u| {
            let linked = match provider {
                OAuthProvider::Google => u.oauth.google_id.as_deref(),
                OAuthProvider::GitHub => u.oauth.github_id.as_deref(),
            };
            linked == Some(external_id)
        }))
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .refresh_index
            .get(token_hash)
            .and_then(|user_id| inner.users.get(user_id))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        for existing in inner.users.values() {
            if existing.email == new_user.email {
                return Err(StoreError::Conflict(UniqueField::Email));
            }
            if existing.username == new_user.username {
                return Err(StoreError::Conflict(UniqueField::Username));
            }
            let google_taken = new_user.oauth.google_id.is_some()
                && existing.oauth.google_id == new_user.oauth.google_id;
            let github_taken = new_user.oauth.github_id.is_some()
                && existing.oauth.github_id == new_user.oauth.github_id;
            if google_taken || github_taken {
                return Err(StoreError::Conflict(UniqueField::OAuthId));
            }
        }
        let now = Utc::now();
        let user = User {
            id: uuidv7().to_string(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            email_verified: new_user.email_verified,
            email_verification_token: new_user.email_verification_token,
            password_reset_token: None,
            password_reset_expires_at: None,
            refresh_tokens: Vec::new(),
            oauth: new_user.oauth,
            profile: new_user.profile,
            subscription: Subscription::default(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.last_login_at = Some(at);
        user.updated_at = at;
        Ok(())
    }

    async fn add_refresh_token(
        &self,
        user_id: &str,
        token: RefreshToken,
        keep: usize,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        let now = Utc::now();
        user.refresh_tokens.push(token);
        prune_refresh_tokens(&mut user.refresh_tokens, keep, now);
        user.updated_at = now;
        inner.reindex(user_id);
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshToken,
        ip: &str,
        keep: usize,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(user_id) = inner.refresh_index.get(old_hash).cloned() else {
            return Ok(false);
        };
        let user = inner.user_mut(&user_id)?;
        let now = Utc::now();
        let Some(old) = user
            .refresh_tokens
            .iter_mut()
            .find(|t| t.token_hash == old_hash)
        else {
            return Ok(false);
        };
        if !old.is_active_at(now) {
            return Ok(false);
        }
        old.revoke(now, ip, Some(replacement.token_hash.clone()));
        user.refresh_tokens.push(replacement);
        prune_refresh_tokens(&mut user.refresh_tokens, keep, now);
        user.updated_at = now;
        inner.reindex(&user_id);
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_hash: &str, ip: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(user_id) = inner.refresh_index.get(token_hash).cloned() else {
            return Ok(false);
        };
        let user = inner.user_mut(&user_id)?;
        let now = Utc::now();
        match user
            .refresh_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.is_active_at(now))
        {
            Some(token) => {
                token.revoke(now, ip, None);
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: &str,
        ip: &str,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        let now = Utc::now();
        let mut revoked = 0;
        for token in user.refresh_tokens.iter_mut().filter(|t| t.is_active_at(now)) {
            token.revoke(now, ip, None);
            revoked += 1;
        }
        user.updated_at = now;
        Ok(revoked)
    }

    async fn set_verification_token(
        &self,
        user_id: &str,
        token_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.email_verification_token = token_hash.map(str::to_string);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.email_verified = true;
        user.email_verification_token = None;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_password_reset(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.password_reset_token = Some(token_hash.to_string());
        user.password_reset_expires_at = Some(expires_at);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_password_hash(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.password_hash = Some(password_hash.to_string());
        user.password_reset_token = None;
        user.password_reset_expires_at = None;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn link_oauth(
        &self,
        user_id: &str,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let taken = inner.users.values().any(|u| {
            u.id != user_id
                && match provider {
                    OAuthProvider::Google => u.oauth.google_id.as_deref() == Some(external_id),
                    OAuthProvider::GitHub => u.oauth.github_id.as_deref() == Some(external_id),
                }
        });
        if taken {
            return Err(StoreError::Conflict(UniqueField::OAuthId));
        }
        let user = inner.user_mut(user_id)?;
        match provider {
            OAuthProvider::Google => user.oauth.google_id = Some(external_id.to_string()),
            OAuthProvider::GitHub => user.oauth.github_id = Some(external_id.to_string()),
        }
        user.email_verified = true;
        user.email_verification_token = None;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(user_id)?;
        user.profile.apply(update);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::auth::{OAuthLinks, Profile, Role};

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: Some("hash".into()),
            role: Role::User,
            email_verified: false,
            email_verification_token: None,
            oauth: OAuthLinks::default(),
            profile: Profile::default(),
        }
    }

    fn refresh(hash: &str) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            token_hash: hash.into(),
            created_at: now,
            expires_at: now + Duration::days(7),
            created_by_ip: "127.0.0.1".into(),
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by: None,
        }
    }

    #[tokio::test]
    async fn create_enforces_unique_email_and_username() {
        let store = MemoryUserStore::new();
        store.create(new_user("bob", "bob@x.com")).await.unwrap();
        assert!(matches!(
            store.create(new_user("bobby", "bob@x.com")).await,
            Err(StoreError::Conflict(UniqueField::Email))
        ));
        assert!(matches!(
            store.create(new_user("bob", "other@x.com")).await,
            Err(StoreError::Conflict(UniqueField::Username))
        ));
        // Case-sensitive comparison.
        store.create(new_user("Bob", "Bob@x.com")).await.unwrap();
        assert_eq!(store.user_count().await, 2);
    }

    #[tokio::test]
    async fn refresh_index_follows_pruning() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("bob", "bob@x.com")).await.unwrap();
        store
            .add_refresh_token(&user.id, refresh("a"), 1)
            .await
            .unwrap();
        assert!(store.find_by_refresh_token("a").await.unwrap().is_some());
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .add_refresh_token(&user.id, refresh("b"), 1)
            .await
            .unwrap();
        assert!(store.find_by_refresh_token("a").await.unwrap().is_none());
        assert_eq!(
            store.find_by_refresh_token("b").await.unwrap().unwrap().id,
            user.id
        );
    }

    #[tokio::test]
    async fn rotate_is_conditional_on_active_token() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("bob", "bob@x.com")).await.unwrap();
        store
            .add_refresh_token(&user.id, refresh("old"), 5)
            .await
            .unwrap();
        assert!(
            store
                .rotate_refresh_token("old", refresh("new1"), "ip", 5)
                .await
                .unwrap()
        );
        // A second rotation of the same token loses.
        assert!(
            !store
                .rotate_refresh_token("old", refresh("new2"), "ip", 5)
                .await
                .unwrap()
        );
        assert!(store.find_by_refresh_token("new2").await.unwrap().is_none());
        assert!(store.find_by_refresh_token("new1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rotation_keeps_revoked_predecessor() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("bob", "bob@x.com")).await.unwrap();
        store
            .add_refresh_token(&user.id, refresh("old"), 5)
            .await
            .unwrap();
        assert!(
            store
                .rotate_refresh_token("old", refresh("new"), "10.0.0.9", 5)
                .await
                .unwrap()
        );

        let user = store.find_by_refresh_token("old").await.unwrap().unwrap();
        assert_eq!(user.refresh_tokens.len(), 2);
        let old = user
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == "old")
            .unwrap();
        assert!(old.revoked_at.is_some());
        assert_eq!(old.revoked_by_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(old.replaced_by.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn revoke_reports_whether_token_was_active() {
        let store = MemoryUserStore::new();
        let user = store.create(new_user("bob", "bob@x.com")).await.unwrap();
        store
            .add_refresh_token(&user.id, refresh("t"), 5)
            .await
            .unwrap();
        assert!(store.revoke_refresh_token("t", "ip").await.unwrap());
        assert!(!store.revoke_refresh_token("t", "ip").await.unwrap());
        assert!(!store.revoke_refresh_token("unknown", "ip").await.unwrap());
        let kept = store.find_by_refresh_token("t").await.unwrap().unwrap();
        assert!(kept.refresh_tokens[0].revoked_at.is_some());
    }

    #[tokio::test]
    async fn link_oauth_marks_verified_and_rejects_duplicates() {
        let store = MemoryUserStore::new();
        let a = store.create(new_user("a", "a@x.com")).await.unwrap();
        let b = store.create(new_user("b", "b@x.com")).await.unwrap();
        store
            .link_oauth(&a.id, OAuthProvider::GitHub, "gh-1")
            .await
            .unwrap();
        let linked = store
            .find_by_oauth_id(OAuthProvider::GitHub, "gh-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.id, a.id);
        assert!(linked.email_verified);
        assert!(matches!(
            store.link_oauth(&b.id, OAuthProvider::GitHub, "gh-1").await,
            Err(StoreError::Conflict(UniqueField::OAuthId))
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_an_error() {
        let store = MemoryUserStore::new();
        assert!(matches!(
            store.mark_email_verified("nope").await,
            Err(StoreError::UserNotFound(_))
        ));
    }
}
