//! Response cache: short-lived memoization of extraction results.
//!
//! ## Per-key atomicity
//!
//! Every key owns an async mutex. A lookup holds it while the producer runs,
//! so concurrent requests for one key wait for the first producer and then
//! read its value instead of fetching again.
//!
//! ## Eviction
//!
//! Entries expire lazily: an access that finds `now - created_at > ttl`
//! drops the value and refetches. When the cache is at capacity, inserting a
//! new key first evicts expired entries and, if none are expired, the least
//! recently accessed one.

use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default maximum number of keys before eviction.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Default time-to-live of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    /// When the entry was last read or written (for LRU).
    last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

type Slot<V> = Arc<Mutex<Option<CacheEntry<V>>>>;

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ResponseCache<K, V> {
    slots: DashMap<K, Slot<V>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    /// A cache reading time from `clock`.
    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the fresh value for `key`, or run `producer`, store its value
    /// with a new timestamp and return it. Producer errors are returned and
    /// not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        let now = self.clock.now();
        if let Some(entry) = guard.as_mut() {
            if !entry.is_expired(now) {
                entry.last_accessed = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("cache hit: {key:?}");
                return Ok(entry.value.clone());
            }
            tracing::debug!("cache entry expired: {key:?}");
            *guard = None;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("cache miss: {key:?}");
        let value = producer().await?;

        let stored_at = self.clock.now();
        *guard = Some(CacheEntry {
            value: value.clone(),
            created_at: stored_at,
            ttl,
            last_accessed: stored_at,
        });
        Ok(value)
    }

    /// The slot for `key`, created (after making room) if absent.
    fn slot(&self, key: &K) -> Slot<V> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        if self.slots.len() >= self.max_entries {
            self.evict();
        }
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    /// Keys whose slot is idle and holds nothing fresh. Slots with a
    /// producer in flight are left alone.
    fn stale_keys(&self, now: Instant) -> Vec<K> {
        self.slots
            .iter()
            .filter(|item| match item.value().try_lock() {
                Ok(guard) => guard.as_ref().map_or(true, |e| e.is_expired(now)),
                Err(_) => false,
            })
            .map(|item| item.key().clone())
            .collect()
    }

    /// Drop expired entries, or failing that the least recently used one.
    fn evict(&self) {
        let expired = self.stale_keys(self.clock.now());
        if !expired.is_empty() {
            for key in expired {
                self.slots.remove(&key);
            }
            return;
        }

        let lru = self
            .slots
            .iter()
            .filter_map(|item| {
                let guard = item.value().try_lock().ok()?;
                let accessed = guard.as_ref()?.last_accessed;
                Some((item.key().clone(), accessed))
            })
            .min_by_key(|(_, accessed)| *accessed)
            .map(|(key, _)| key);
        if let Some(key) = lru {
            tracing::debug!("evicting LRU cache entry: {key:?}");
            self.slots.remove(&key);
        }
    }

    /// Forget `key`; the next access refetches.
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let expired = self.stale_keys(self.clock.now());
        for key in &expired {
            self.slots.remove(key);
        }
        expired.len()
    }

    /// Number of tracked keys (including expired).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn cache_with(clock: &Arc<ManualClock>, max: usize) -> ResponseCache<String, u32> {
        ResponseCache::with_clock(max, clock.clone())
    }

    async fn fetch(
        cache: &ResponseCache<String, u32>,
        key: &str,
        ttl: Duration,
        calls: &AtomicUsize,
        value: u32,
    ) -> u32 {
        cache
            .get_or_fetch(key.to_string(), ttl, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(value)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hit_within_ttl_and_refetch_after() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 8);
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(300);

        assert_eq!(fetch(&cache, "dave/spotlight/en-US", ttl, &calls, 1).await, 1);
        clock.advance(Duration::from_secs(120));
        assert_eq!(fetch(&cache, "dave/spotlight/en-US", ttl, &calls, 2).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(240));
        assert_eq!(fetch(&cache, "dave/spotlight/en-US", ttl, &calls, 3).await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[tokio::test]
    async fn test_entry_at_exact_ttl_is_fresh() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 8);
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(10);
        fetch(&cache, "k", ttl, &calls, 1).await;
        clock.advance(ttl);
        fetch(&cache, "k", ttl, &calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 8);
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let first: Result<u32, &str> = cache
            .get_or_fetch("k".to_string(), DEFAULT_TTL, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("upstream down")
            })
            .await;
        assert_eq!(first, Err("upstream down"));

        assert_eq!(fetch(&cache, "k", DEFAULT_TTL, &calls, 7).await, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_runs_one_producer() {
        let cache: ResponseCache<String, u32> = ResponseCache::new(8);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let slow = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ()>(42)
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("x/spotlight/en-US".to_string(), DEFAULT_TTL, slow),
            cache.get_or_fetch("x/spotlight/en-US".to_string(), DEFAULT_TTL, slow),
        );
        assert_eq!((a, b), (Ok(42), Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 2);
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(3600);

        fetch(&cache, "a", ttl, &calls, 1).await;
        clock.advance(Duration::from_secs(1));
        fetch(&cache, "b", ttl, &calls, 2).await;
        clock.advance(Duration::from_secs(1));
        fetch(&cache, "a", ttl, &calls, 1).await;
        clock.advance(Duration::from_secs(1));
        fetch(&cache, "c", ttl, &calls, 3).await;

        assert_eq!(cache.len(), 2);
        // "b" was least recently used, so it was evicted and refetches.
        let before = calls.load(Ordering::SeqCst);
        fetch(&cache, "a", ttl, &calls, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
        fetch(&cache, "b", ttl, &calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_first() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 2);
        let calls = AtomicUsize::new(0);

        fetch(&cache, "short", Duration::from_secs(1), &calls, 1).await;
        clock.advance(Duration::from_secs(1));
        fetch(&cache, "long", Duration::from_secs(3600), &calls, 2).await;
        clock.advance(Duration::from_secs(5));
        fetch(&cache, "new", Duration::from_secs(3600), &calls, 3).await;

        let before = calls.load(Ordering::SeqCst);
        fetch(&cache, "long", Duration::from_secs(3600), &calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_invalidate_and_cleanup() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&clock, 8);
        let calls = AtomicUsize::new(0);

        fetch(&cache, "a", Duration::from_secs(10), &calls, 1).await;
        fetch(&cache, "b", Duration::from_secs(100), &calls, 2).await;
        cache.invalidate(&"a".to_string());
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }
}
