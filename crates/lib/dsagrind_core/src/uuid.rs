//! UUIDv7 helper (timestamp-sortable ids).
//!
//! PostgreSQL only generates v4 ids natively. Users keep the database
//! default; user ids in the in-memory store, refresh-token row ids, and
//! access-token `jti` claims are generated here so they sort by creation.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
