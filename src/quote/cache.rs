//! Read-through TTL cache with single-flight fetches
//!
//! Entries live in a bounded moka cache and expire `ttl` after insertion. Concurrent misses
//! for the same key share one upstream fetch and all observe its result. Failures are handed
//! to every waiter but never stored.

use moka::future::Cache;
use moka::notification::RemovalCause;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default bound on cached entries
pub const DEFAULT_CAPACITY: u64 = 10_000;

pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Cache<K, Arc<V>>,
    expired: Arc<AtomicUsize>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration, capacity: u64) -> Self {
        let expired = Arc::new(AtomicUsize::new(0));
        let counter = expired.clone();
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Expired) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self {
            name,
            ttl,
            entries,
            expired,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value, if any
    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).await
    }

    /// Return the cached value or run `fetch`, joining a fetch already in flight for `key`
    pub async fn get_or_fetch<E, F, Fut>(&self, key: K, fetch: F) -> Result<Arc<V>, E>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.entries.get(&key).await {
            debug!("{} cache hit for {:?}", self.name, key);
            crate::metrics::record_cache_hit(self.name);
            return Ok(value);
        }

        // moka coalesces concurrent loads of one key and never stores an error
        self.entries
            .try_get_with(key, async move { fetch().await.map(Arc::new) })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.invalidate(key).await;
    }

    /// Evict expired entries now, returning how many expired since the last call
    pub async fn purge_expired(&self) -> usize {
        self.entries.run_pending_tasks().await;
        self.expired.swap(0, Ordering::Relaxed)
    }

    /// Resident entries as of the last maintenance pass
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}
