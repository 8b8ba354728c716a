//! In-memory cache with TTL-based expiration.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CacheError, Counter, KeyValueCache};

/// A cached entry with expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local cache. Each key's shard lock makes `increment` atomic.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(
        self: &std::sync::Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                cache.cleanup();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let entry = occupied.get_mut();
                let count = entry
                    .value
                    .parse::<u64>()
                    .map_err(|_| CacheError::NotACounter {
                        key: key.to_string(),
                    })?
                    + 1;
                entry.value = count.to_string();
                Ok(Counter {
                    count,
                    ttl: entry.expires_at.saturating_duration_since(now),
                })
            }
            Entry::Occupied(mut expired) => {
                expired.insert(CacheEntry {
                    value: "1".into(),
                    expires_at: now + ttl,
                });
                Ok(Counter { count: 1, ttl })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value: "1".into(),
                    expires_at: now + ttl,
                });
                Ok(Counter { count: 1, ttl })
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_and_get() {
        let cache = MemoryCache::new();
        cache.set("k1", "v1".into(), MINUTE).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap().as_deref(), Some("v1"));
        cache.delete("k1").await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_returns_none() {
        let cache = MemoryCache::new();
        cache.set("k1", "v1".into(), Duration::ZERO).await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
        assert!(cache.ttl("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let cache = MemoryCache::new();
        cache.set("state", "google".into(), MINUTE).await.unwrap();
        assert_eq!(cache.take("state").await.unwrap().as_deref(), Some("google"));
        assert!(cache.take("state").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_sets_ttl_only_on_first_call() {
        let cache = MemoryCache::new();
        let first = cache.increment("c", MINUTE).await.unwrap();
        assert_eq!(first.count, 1);
        let second = cache.increment("c", 10 * MINUTE).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.ttl <= MINUTE, "window must not be extended");
    }

    #[tokio::test]
    async fn increment_restarts_after_expiry() {
        let cache = MemoryCache::new();
        cache.increment("c", Duration::from_millis(20)).await.unwrap();
        cache.increment("c", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let counter = cache.increment("c", MINUTE).await.unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn increment_rejects_non_counter() {
        let cache = MemoryCache::new();
        cache.set("k", "abc".into(), MINUTE).await.unwrap();
        assert!(matches!(
            cache.increment("k", MINUTE).await,
            Err(CacheError::NotACounter { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let cache = Arc::new(MemoryCache::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.increment("hot", MINUTE).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.get("hot").await.unwrap().as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn cleanup_removes_expired() {
        let cache = MemoryCache::new();
        cache.set("fresh", "a".into(), MINUTE).await.unwrap();
        cache.set("stale", "b".into(), Duration::ZERO).await.unwrap();
        cache.cleanup();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").await.unwrap().is_some());
    }
}
