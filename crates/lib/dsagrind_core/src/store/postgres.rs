//! PostgreSQL user store.
//!
//! Users live in `users`; refresh tokens in `refresh_tokens` with a unique
//! index on the token digest, so token lookups are index-backed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{StoreError, UniqueField, UserStore};
use crate::models::auth::{
    NewUser, OAuthLinks, Profile, ProfileUpdate, RefreshToken, Subscription, User,
};
use crate::oauth::OAuthProvider;
use crate::uuid::uuidv7;

const USER_COLUMNS: &str = "id::text AS id, username, email, password_hash, role, \
     email_verified, email_verification_token, password_reset_token, \
     password_reset_expires_at, google_id, github_id, first_name, last_name, \
     avatar_url, bio, location, website, subscription_plan, subscription_status, \
     created_at, updated_at, last_login_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: Option<String>,
    role: String,
    email_verified: bool,
    email_verification_token: Option<String>,
    password_reset_token: Option<String>,
    password_reset_expires_at: Option<DateTime<Utc>>,
    google_id: Option<String>,
    github_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    avatar_url: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    website: Option<String>,
    subscription_plan: String,
    subscription_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self, refresh_tokens: Vec<RefreshToken>) -> Result<User, StoreError> {
        Ok(User {
            role: self.role.parse().map_err(StoreError::Corrupt)?,
            subscription: Subscription {
                plan: self.subscription_plan.parse().map_err(StoreError::Corrupt)?,
                status: self
                    .subscription_status
                    .parse()
                    .map_err(StoreError::Corrupt)?,
            },
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            email_verified: self.email_verified,
            email_verification_token: self.email_verification_token,
            password_reset_token: self.password_reset_token,
            password_reset_expires_at: self.password_reset_expires_at,
            refresh_tokens,
            oauth: OAuthLinks {
                google_id: self.google_id,
                github_id: self.github_id,
            },
            profile: Profile {
                first_name: self.first_name,
                last_name: self.last_name,
                avatar_url: self.avatar_url,
                bio: self.bio,
                location: self.location,
                website: self.website,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login_at: self.last_login_at,
        })
    }
}

type TokenRow = (
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    String,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<String>,
);

fn token_from_row(row: TokenRow) -> RefreshToken {
    let (token_hash, created_at, expires_at, created_by_ip, revoked_at, revoked_by_ip, replaced_by) =
        row;
    RefreshToken {
        token_hash,
        created_at,
        expires_at,
        created_by_ip,
        revoked_at,
        revoked_by_ip,
        replaced_by,
    }
}

/// Map unique and foreign-key violations onto store errors.
fn map_db_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        match db.constraint() {
            Some("users_email_unique") => return StoreError::Conflict(UniqueField::Email),
            Some("users_username_unique") => return StoreError::Conflict(UniqueField::Username),
            Some("users_google_id_unique") | Some("users_github_id_unique") => {
                return StoreError::Conflict(UniqueField::OAuthId);
            }
            _ => {}
        }
        if db.is_foreign_key_violation() {
            return StoreError::UserNotFound("referenced user does not exist".into());
        }
    }
    StoreError::DbError(e)
}

fn parse_id(user_id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(user_id).map_err(|_| StoreError::UserNotFound(user_id.to_string()))
}

fn oauth_column(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Google => "google_id",
        OAuthProvider::GitHub => "github_id",
    }
}

async fn insert_token(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    token: &RefreshToken,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO refresh_tokens \
         (id, user_id, token_hash, created_at, expires_at, created_by_ip) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(uuidv7())
    .bind(user_id)
    .bind(&token.token_hash)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(&token.created_by_ip)
    .execute(&mut **tx)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

/// Delete active tokens of a user beyond the `keep` most recent. Revoked
/// and expired rows are kept.
async fn prune_tokens(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    keep: usize,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM refresh_tokens \
         WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 \
         AND id NOT IN ( \
             SELECT id FROM refresh_tokens \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 \
             ORDER BY created_at DESC \
             LIMIT $3)",
    )
    .bind(user_id)
    .bind(now)
    .bind(keep as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// sqlx-backed [`UserStore`].
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_tokens(&self, user_id: &str) -> Result<Vec<RefreshToken>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT token_hash, created_at, expires_at, created_by_ip, \
                    revoked_at, revoked_by_ip, replaced_by \
             FROM refresh_tokens WHERE user_id = $1::uuid \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(token_from_row).collect())
    }

    async fn hydrate(&self, row: Option<UserRow>) -> Result<Option<User>, StoreError> {
        match row {
            Some(row) => {
                let tokens = self.load_tokens(&row.id).await?;
                Ok(Some(row.into_user(tokens)?))
            }
            None => Ok(None),
        }
    }

    /// Fetch one user matching `clause`, which binds `$1` to `value`.
    async fn find_where(&self, clause: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    /// Run an update on one user, failing if the id matched nothing.
    async fn update_user(&self, sql: &str, user_id: &str) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let Ok(id) = Uuid::parse_str(user_id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where("email = $1", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where("username = $1", username).await
    }

    async fn find_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_where("email_verification_token = $1", token_hash)
            .await
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        self.find_where("password_reset_token = $1", token_hash).await
    }

    async fn find_by_oauth_id(
        &self,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let clause = format!("{} = $1", oauth_column(provider));
        self.find_where(&clause, external_id).await
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        self.find_where(
            "id = (SELECT user_id FROM refresh_tokens WHERE token_hash = $1)",
            token_hash,
        )
        .await
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users \
             (username, email, password_hash, role, email_verified, email_verification_token, \
              google_id, github_id, first_name, last_name, avatar_url, bio, location, website) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .bind(new_user.email_verified)
            .bind(&new_user.email_verification_token)
            .bind(&new_user.oauth.google_id)
            .bind(&new_user.oauth.github_id)
            .bind(&new_user.profile.first_name)
            .bind(&new_user.profile.last_name)
            .bind(&new_user.profile.avatar_url)
            .bind(&new_user.profile.bio)
            .bind(&new_user.profile.location)
            .bind(&new_user.profile.website)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.into_user(Vec::new())
    }

    async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let result =
            sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn add_refresh_token(
        &self,
        user_id: &str,
        token: RefreshToken,
        keep: usize,
    ) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let mut tx = self.pool.begin().await?;
        insert_token(&mut tx, id, &token).await?;
        prune_tokens(&mut tx, id, keep, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        replacement: RefreshToken,
        ip: &str,
        keep: usize,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        // The row lock taken here serializes concurrent rotations of one
        // token; the loser re-checks `revoked_at` and matches nothing.
        let owner = sqlx::query_scalar::<_, Uuid>(
            "UPDATE refresh_tokens \
             SET revoked_at = $2, revoked_by_ip = $3, replaced_by = $4 \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2 \
             RETURNING user_id",
        )
        .bind(old_hash)
        .bind(now)
        .bind(ip)
        .bind(&replacement.token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            tx.rollback().await?;
            return Ok(false);
        };
        insert_token(&mut tx, user_id, &replacement).await?;
        prune_tokens(&mut tx, user_id, keep, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_hash: &str, ip: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2, revoked_by_ip = $3 \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(Utc::now())
        .bind(ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: &str,
        ip: &str,
    ) -> Result<usize, StoreError> {
        let id = parse_id(user_id)?;
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2, revoked_by_ip = $3 \
             WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn set_verification_token(
        &self,
        user_id: &str,
        token_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let result = sqlx::query(
            "UPDATE users SET email_verification_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<(), StoreError> {
        self.update_user(
            "UPDATE users SET email_verified = TRUE, email_verification_token = NULL, \
             updated_at = now() WHERE id = $1",
            user_id,
        )
        .await
    }

    async fn set_password_reset(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let result = sqlx::query(
            "UPDATE users SET password_reset_token = $2, password_reset_expires_at = $3, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn set_password_hash(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, password_reset_token = NULL, \
             password_reset_expires_at = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn link_oauth(
        &self,
        user_id: &str,
        provider: OAuthProvider,
        external_id: &str,
    ) -> Result<(), StoreError> {
        let id = parse_id(user_id)?;
        let sql = format!(
            "UPDATE users SET {} = $2, email_verified = TRUE, \
             email_verification_token = NULL, updated_at = now() WHERE id = $1",
            oauth_column(provider)
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> Result<User, StoreError> {
        let id = parse_id(user_id)?;
        let sql = format!(
            "UPDATE users SET \
                first_name = COALESCE($2, first_name), \
                last_name = COALESCE($3, last_name), \
                avatar_url = COALESCE($4, avatar_url), \
                bio = COALESCE($5, bio), \
                location = COALESCE($6, location), \
                website = COALESCE($7, website), \
                updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(update.first_name)
            .bind(update.last_name)
            .bind(update.avatar_url)
            .bind(update.bio)
            .bind(update.location)
            .bind(update.website)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row)
            .await?
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_columns_are_fixed() {
        assert_eq!(oauth_column(OAuthProvider::Google), "google_id");
        assert_eq!(oauth_column(OAuthProvider::GitHub), "github_id");
    }

    #[test]
    fn malformed_id_is_not_found() {
        assert!(matches!(
            parse_id("not-a-uuid"),
            Err(StoreError::UserNotFound(_))
        ));
        assert!(parse_id(&uuidv7().to_string()).is_ok());
    }

    #[test]
    fn non_database_errors_pass_through() {
        assert!(matches!(
            map_db_error(sqlx::Error::RowNotFound),
            StoreError::DbError(sqlx::Error::RowNotFound)
        ));
    }

    #[test]
    fn corrupt_role_is_reported() {
        let now = Utc::now();
        let row = UserRow {
            id: "id".into(),
            username: "u".into(),
            email: "e".into(),
            password_hash: None,
            role: "superuser".into(),
            email_verified: false,
            email_verification_token: None,
            password_reset_token: None,
            password_reset_expires_at: None,
            google_id: None,
            github_id: None,
            first_name: None,
            last_name: None,
            avatar_url: None,
            bio: None,
            location: None,
            website: None,
            subscription_plan: "free".into(),
            subscription_status: "active".into(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        assert!(matches!(row.into_user(Vec::new()), Err(StoreError::Corrupt(_))));
    }
}
