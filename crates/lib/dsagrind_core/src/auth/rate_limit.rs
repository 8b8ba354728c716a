//! Fixed-window login throttling on top of the key-value cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheError, KeyValueCache};

/// Outcome of counting one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the post-increment count is still within the limit.
    pub allowed: bool,
    pub count: u64,
    /// Time until the window closes.
    pub remaining: Duration,
}

/// Counts attempts per key within a fixed window.
///
/// Increments go through the cache's atomic counter, so concurrent callers
/// for one key never lose counts or reopen the window early.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn KeyValueCache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Cache key for login attempts by `email`.
    pub fn login_key(email: &str) -> String {
        format!("login_attempts:{email}")
    }

    /// Count one attempt for `key`; the window starts on the first attempt.
    pub async fn check_and_increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, CacheError> {
        let counter = self.cache.increment(key, window).await?;
        let allowed = counter.count <= limit;
        if !allowed {
            warn!(key, count = counter.count, "rate limit exceeded");
        }
        Ok(RateLimitDecision {
            allowed,
            count: counter.count,
            remaining: counter.ttl,
        })
    }

    /// Without counting, report whether `key` has used up its `limit`.
    /// Returns the time left in the window when blocked.
    pub async fn blocked_for(&self, key: &str, limit: u64) -> Result<Option<Duration>, CacheError> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };
        let count = raw.parse::<u64>().unwrap_or(0);
        if count < limit {
            return Ok(None);
        }
        let remaining = self.cache.ttl(key).await?.unwrap_or(Duration::ZERO);
        debug!(key, count, remaining_secs = remaining.as_secs(), "key is throttled");
        Ok(Some(remaining))
    }

    /// Clear the counter for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), CacheError> {
        self.cache.delete(key).await
    }
}
