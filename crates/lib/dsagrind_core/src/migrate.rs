//! Database migrations for [`crate::store::PgUserStore`].
//!
//! Embeds the SQL files under `dsagrind_core/migrations/`.

use sqlx::PgPool;
use tracing::info;

/// Run all embedded migrations against `pool`.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}
