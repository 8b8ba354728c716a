//! Key-value cache port used for login throttling, cached user
//! projections, and OAuth state.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCache;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Value at {key} is not a counter")]
    NotACounter { key: String },
}

/// State of a counter after an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Time until the counter expires.
    pub ttl: Duration,
}

/// String cache with per-key expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Value for `key` unless absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Insert or replace `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove and return `key` in one step.
    async fn take(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Atomically add one to the counter at `key`.
    ///
    /// The TTL is set to `ttl` only when this call creates the counter, so
    /// concurrent callers share one fixed window.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, CacheError>;

    /// Remaining lifetime of `key`, if present.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;
}
