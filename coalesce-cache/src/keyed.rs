//! Single-flight TTL cache with one lock per key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use coalesce_core::traits::Coalesce;
use coalesce_core::types::CacheStats;

use crate::config::CoalescerConfig;
use crate::counters::Counters;
use crate::entry::CacheEntry;

type Slot<V, E> = Arc<RwLock<Option<CacheEntry<V, E>>>>;

/// Single-flight cache that locks per key instead of globally.
///
/// Same double-checked algorithm as [`Coalescer`](crate::Coalescer), applied
/// to the key's own slot: read lock for the fast path, write lock plus
/// re-check before computing. Callers for the same key still wait for a
/// single computation, but a slow operation on one key no longer blocks
/// lookups or recomputation of other keys.
///
/// The slot map is only locked long enough to fetch or create a slot; no map
/// guard is held while an operation runs.
pub struct KeyedCoalescer<V, E> {
    slots: DashMap<String, Slot<V, E>>,
    config: CoalescerConfig,
    counters: Counters,
}

impl<V, E> KeyedCoalescer<V, E>
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
            slots: DashMap::with_capacity(config.initial_capacity),
            config,
            counters: Counters::default(),
        }
    }

    /// Returns the configuration this cache was built with.
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    /// Returns the outcome cached for `key`, running `operation` if the key
    /// is absent or stale. Only callers for the same key wait on it.
    pub fn resolve<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key);

        if let Some(outcome) = valid_outcome(&slot.read()) {
            self.counters.hit();
            trace!(key, "Cache hit");
            return outcome;
        }

        let mut entry = slot.write();
        if let Some(outcome) = valid_outcome(&entry) {
            self.counters.coalesce();
            debug!(key, "Coalesced with concurrent computation");
            return outcome;
        }

        let started = Instant::now();
        let fresh = CacheEntry::new(operation(), ttl);
        self.counters.compute();
        debug!(
            key,
            ttl_ms = ttl.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = fresh.is_error(),
            "Computed entry"
        );

        let outcome = fresh.to_outcome();
        *entry = Some(fresh);
        outcome
    }

    /// Resolves `key` with the configured default TTL.
    pub fn resolve_default<F>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.resolve(key, self.config.default_ttl(), operation)
    }

    fn slot(&self, key: &str) -> Slot<V, E> {
        if let Some(slot) = self.slots.get(key) {
            return slot.value().clone();
        }
        self.slots
            .entry(key.to_owned())
            .or_insert_with(Default::default)
            .value()
            .clone()
    }

    /// Clones every slot handle so no map guard is held while slots are read.
    fn all_slots(&self) -> Vec<Slot<V, E>> {
        self.slots.iter().map(|s| s.value().clone()).collect()
    }

    /// When the entry for `key` was computed, whether or not it is still valid.
    pub fn computed_at(&self, key: &str) -> Option<Instant> {
        let slot = self.slots.get(key)?.value().clone();
        let entry = slot.read();
        entry.as_ref().map(CacheEntry::computed_at)
    }

    /// Returns the number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.all_slots()
            .iter()
            .filter(|slot| slot.read().is_some())
            .count()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let validity: Vec<bool> = self
            .all_slots()
            .iter()
            .filter_map(|slot| slot.read().as_ref().map(|e| e.is_valid_at(now)))
            .collect();
        self.counters.snapshot(validity)
    }
}

fn valid_outcome<V: Clone, E: Clone>(entry: &Option<CacheEntry<V, E>>) -> Option<Result<V, E>> {
    entry
        .as_ref()
        .filter(|e| e.is_valid())
        .map(CacheEntry::to_outcome)
}

impl<V, E> Default for KeyedCoalescer<V, E>
where
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Coalesce<V, E> for KeyedCoalescer<V, E>
where
    V: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    fn resolve<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        KeyedCoalescer::resolve(self, key, ttl, operation)
    }

    fn resolve_default<F>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        KeyedCoalescer::resolve_default(self, key, operation)
    }

    fn stats(&self) -> CacheStats {
        KeyedCoalescer::stats(self)
    }
}
