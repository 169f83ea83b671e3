//! Single-flight TTL cache guarded by one global lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, trace};

use coalesce_core::traits::Coalesce;
use coalesce_core::types::CacheStats;

use crate::config::CoalescerConfig;
use crate::counters::Counters;
use crate::entry::CacheEntry;

/// In-memory single-flight cache.
///
/// Lookups take a shared read lock, so any number of callers can be served
/// from valid entries concurrently. A miss releases the read lock, takes the
/// exclusive write lock, checks the entry again and only then runs the
/// operation, still under the write lock. This guarantees at most one
/// computation per key per staleness episode.
///
/// Because the write lock is held while the operation runs, every other
/// caller, for any key, waits until it finishes. Use
/// [`KeyedCoalescer`](crate::KeyedCoalescer) when unrelated keys must be able
/// to recompute in parallel.
///
/// Entries are overwritten when stale but never removed, so memory grows with
/// the number of distinct keys ever resolved.
///
/// # Deadlocks
///
/// The operation must not call back into the same cache.
pub struct Coalescer<V, E> {
    entries: RwLock<HashMap<String, CacheEntry<V, E>>>,
    config: CoalescerConfig,
    counters: Counters,
}

impl<V, E> Coalescer<V, E>
where
    V: Clone,
    E: Clone,
{
    /// Creates a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CoalescerConfig::default())
    }

    /// Creates a cache with custom configuration.
    pub fn with_config(config: CoalescerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.initial_capacity)),
            config,
            counters: Counters::default(),
        }
    }

    /// Returns the configuration this cache was built with.
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    /// Returns the outcome cached for `key`, running `operation` if the key
    /// is absent or stale.
    ///
    /// `ttl` only applies if this call performs the computation; a valid
    /// entry keeps the TTL it was stored with.
    pub fn resolve<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(outcome) = self.lookup(key) {
            self.counters.hit();
            trace!(key, "Cache hit");
            return outcome;
        }

        self.refresh(key, ttl, operation)
    }

    /// Resolves `key` with the configured default TTL.
    pub fn resolve_default<F>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.resolve(key, self.config.default_ttl(), operation)
    }

    fn lookup(&self, key: &str) -> Option<Result<V, E>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.is_valid())
            .map(CacheEntry::to_outcome)
    }

    fn refresh<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut entries = self.entries.write();

        // Another caller may have refreshed the entry while we waited.
        if let Some(entry) = entries.get(key).filter(|e| e.is_valid()) {
            self.counters.coalesce();
            debug!(key, "Coalesced with concurrent computation");
            return entry.to_outcome();
        }

        let started = Instant::now();
        let entry = CacheEntry::new(operation(), ttl);
        self.counters.compute();
        debug!(
            key,
            ttl_ms = ttl.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = entry.is_error(),
            "Computed entry"
        );

        let outcome = entry.to_outcome();
        match entries.get_mut(key) {
            Some(slot) => *slot = entry,
            None => {
                entries.insert(key.to_owned(), entry);
            }
        }
        outcome
    }

    /// When the entry for `key` was computed, whether or not it is still valid.
    pub fn computed_at(&self, key: &str) -> Option<Instant> {
        self.entries.read().get(key).map(CacheEntry::computed_at)
    }

    /// Returns the number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let now = Instant::now();
        self.counters
            .snapshot(entries.values().map(|e| e.is_valid_at(now)))
    }
}

impl<V, E> Default for Coalescer<V, E>
where
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Coalesce<V, E> for Coalescer<V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn resolve<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        Coalescer::resolve(self, key, ttl, operation)
    }

    fn resolve_default<F>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        Coalescer::resolve_default(self, key, operation)
    }

    fn stats(&self) -> CacheStats {
        Coalescer::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    const LONG_TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_resolve_computes_once() {
        let cache: Coalescer<u32, String> = Coalescer::new();
        let calls = AtomicUsize::new(0);
        let op = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        };

        assert_eq!(cache.resolve("answer", LONG_TTL, op), Ok(42));
        assert_eq!(cache.resolve("answer", LONG_TTL, op), Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_burst_single_flight() {
        let cache: Arc<Coalescer<usize, String>> = Arc::new(Coalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(100));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.resolve("burst", LONG_TTL, || {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        thread::sleep(Duration::from_millis(2));
                        Ok(n)
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.requests(), 100);
    }

    #[test]
    fn test_error_is_cached() {
        let cache: Coalescer<u32, String> = Coalescer::new();
        let calls = AtomicUsize::new(0);
        let failing = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("upstream unavailable".to_string())
        };

        assert_eq!(
            cache.resolve("flaky", LONG_TTL, failing),
            Err("upstream unavailable".to_string())
        );
        // A succeeding operation is not consulted while the error is valid.
        assert_eq!(
            cache.resolve("flaky", LONG_TTL, || Ok(1)),
            Err("upstream unavailable".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_recomputed_after_expiry() {
        let cache: Coalescer<u32, String> = Coalescer::new();
        let ttl = Duration::from_millis(5);

        assert!(cache.resolve("flaky", ttl, || Err("down".into())).is_err());
        thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.resolve("flaky", ttl, || Ok(3)), Ok(3));
    }

    #[test]
    fn test_zero_ttl_always_recomputes() {
        let cache: Coalescer<usize, ()> = Coalescer::new();
        let calls = AtomicUsize::new(0);

        for expected in 1..=3 {
            let n = cache.resolve("volatile", Duration::ZERO, || {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            });
            assert_eq!(n, Ok(expected));
        }
        assert_eq!(cache.stats().computations, 3);
    }

    #[test]
    fn test_ttl_of_recomputing_call_is_kept() {
        let cache: Coalescer<u32, ()> = Coalescer::new();

        let short = Duration::from_millis(50);

        cache.resolve("k", short, || Ok(1)).unwrap();
        // A longer TTL on a hit does not extend the stored entry.
        assert_eq!(cache.resolve("k", LONG_TTL, || Ok(2)), Ok(1));
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.resolve("k", LONG_TTL, || Ok(3)), Ok(3));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.resolve("k", short, || Ok(4)), Ok(3));
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn test_hit_keeps_computed_at() {
        let cache: Coalescer<u32, ()> = Coalescer::new();
        cache.resolve("k", LONG_TTL, || Ok(1)).unwrap();
        let first = cache.computed_at("k").unwrap();

        for _ in 0..10 {
            thread::sleep(Duration::from_millis(1));
            cache.resolve("k", LONG_TTL, || Ok(2)).unwrap();
        }

        assert_eq!(cache.computed_at("k"), Some(first));
        assert_eq!(cache.stats().hits, 10);
    }

    #[test]
    fn test_keys_are_independent() {
        let cache: Coalescer<&'static str, ()> = Coalescer::new();
        assert_eq!(cache.resolve("a", LONG_TTL, || Ok("alpha")), Ok("alpha"));
        assert_eq!(cache.resolve("b", LONG_TTL, || Ok("beta")), Ok("beta"));
        assert_eq!(cache.resolve("a", LONG_TTL, || Ok("other")), Ok("alpha"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_resolve_default_uses_config_ttl() {
        let config = CoalescerConfig::default().with_default_ttl(Duration::from_millis(50));
        let cache: Coalescer<u32, ()> = Coalescer::with_config(config);

        assert_eq!(cache.resolve_default("k", || Ok(1)), Ok(1));
        assert_eq!(cache.resolve_default("k", || Ok(2)), Ok(1));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.resolve_default("k", || Ok(3)), Ok(3));
    }

    #[test]
    fn test_stale_entry_is_replaced_not_removed() {
        let cache: Coalescer<u32, ()> = Coalescer::new();
        cache.resolve("k", Duration::from_millis(1), || Ok(1)).unwrap();
        thread::sleep(Duration::from_millis(10));

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert!(cache.computed_at("k").is_some());

        cache.resolve("k", LONG_TTL, || Ok(2)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().valid_entries, 1);
    }

    #[test]
    fn test_panicking_operation_leaves_cache_usable() {
        let cache: Arc<Coalescer<u32, ()>> = Arc::new(Coalescer::new());

        let panicked = {
            let cache = cache.clone();
            thread::spawn(move || cache.resolve("k", LONG_TTL, || panic!("boom"))).join()
        };
        assert!(panicked.is_err());

        assert!(cache.is_empty());
        assert_eq!(cache.resolve("k", LONG_TTL, || Ok(5)), Ok(5));
    }

    #[test]
    fn test_instances_are_isolated() {
        let first: Coalescer<u32, ()> = Coalescer::new();
        let second: Coalescer<u32, ()> = Coalescer::new();

        first.resolve("k", LONG_TTL, || Ok(1)).unwrap();
        assert_eq!(second.resolve("k", LONG_TTL, || Ok(2)), Ok(2));
    }
}
