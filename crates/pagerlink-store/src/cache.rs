//! Read-through lookup cache using [`moka`].
//!
//! Fronts hot reverse lookups (provider event → internal record) so that
//! every incoming webhook does not hit SQLite. Entries are plain clones of
//! the record; writers invalidate explicitly.
//!
//! A load that raced with an invalidation never leaves its value behind:
//! every invalidation bumps a generation counter, and a loader that sees
//! the counter move after inserting drops its own entry.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::StoreResult;

/// Hit / miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hits={} misses={}", self.hits(), self.misses())
    }
}

/// A bounded, TTL-limited cache in front of a loader.
pub struct LookupCache<K, V> {
    name: &'static str,
    inner: Cache<K, V>,
    generation: Arc<AtomicU64>,
    stats: Arc<CacheStats>,
}

impl<K, V> Clone for LookupCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            generation: Arc::clone(&self.generation),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V> LookupCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            name,
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            generation: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Return the cached value, or run `loader` and cache a `Some` result.
    ///
    /// Misses (`None`) are not cached, so a record created later is seen on
    /// the next lookup.
    pub async fn get_or_load<F, Fut>(&self, key: &K, loader: F) -> StoreResult<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = StoreResult<Option<V>>>,
    {
        if let Some(hit) = self.inner.get(key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache = self.name, key = ?key, "cache hit");
            return Ok(Some(hit));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let started = self.generation.load(Ordering::SeqCst);
        let loaded = loader().await?;
        if let Some(ref value) = loaded {
            self.inner.insert(key.clone(), value.clone()).await;
            // Insert first, then re-check: an invalidation ordered after this
            // load removes the entry itself.
            if self.generation.load(Ordering::SeqCst) != started {
                self.inner.invalidate(key).await;
                debug!(cache = self.name, key = ?key, "stale load discarded");
            }
        }
        Ok(loaded)
    }

    pub async fn invalidate(&self, key: &K) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(key).await;
        debug!(cache = self.name, key = ?key, "cache invalidate");
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> LookupCache<String, u32> {
        LookupCache::new("test", 16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn loads_once_then_hits() {
        let cache = cache();
        let key = "a".to_string();

        let first = cache.get_or_load(&key, || async { Ok(Some(7)) }).await.unwrap();
        let second = cache.get_or_load(&key, || async { Ok(Some(99)) }).await.unwrap();

        assert_eq!(first, Some(7));
        assert_eq!(second, Some(7));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let cache = cache();
        let key = "a".to_string();

        assert_eq!(cache.get_or_load(&key, || async { Ok(None) }).await.unwrap(), None);
        assert_eq!(
            cache.get_or_load(&key, || async { Ok(Some(1)) }).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let cache = cache();
        let key = "a".to_string();
        cache.get_or_load(&key, || async { Ok(Some(1)) }).await.unwrap();

        cache.invalidate(&key).await;
        let reloaded = cache.get_or_load(&key, || async { Ok(Some(2)) }).await.unwrap();
        assert_eq!(reloaded, Some(2));
    }

    #[tokio::test]
    async fn load_racing_an_invalidation_is_not_kept() {
        let cache = cache();
        let key = "a".to_string();

        // The row is read, then a writer updates it and invalidates before
        // the loader gets to insert.
        let writer = cache.clone();
        let stale = cache
            .get_or_load(&key, || {
                let key = key.clone();
                async move {
                    writer.invalidate(&key).await;
                    Ok(Some(1))
                }
            })
            .await
            .unwrap();
        assert_eq!(stale, Some(1));

        let fresh = cache.get_or_load(&key, || async { Ok(Some(2)) }).await.unwrap();
        assert_eq!(fresh, Some(2));
        assert_eq!(cache.stats().hits(), 0);
    }
}
