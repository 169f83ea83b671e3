//! Async single-flight cache where latecomers join the in-flight computation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use coalesce_core::error::{CoalesceError, Result as CoalesceResult};
use coalesce_core::types::CacheStats;

use crate::config::CoalescerConfig;
use crate::counters::Counters;
use crate::entry::CacheEntry;

/// A spawned computation every waiter can await. Resolves to `None` if the
/// task panicked or was cancelled by runtime shutdown.
type Computation<V, E> = Shared<BoxFuture<'static, Option<CacheEntry<V, E>>>>;

type Slots<V, E> = Arc<Mutex<HashMap<String, Slot<V, E>>>>;

enum Slot<V, E> {
    Ready(CacheEntry<V, E>),
    Pending {
        id: u64,
        computation: Computation<V, E>,
    },
}

impl<V, E> Slot<V, E> {
    fn ready(&self) -> Option<&CacheEntry<V, E>> {
        match self {
            Slot::Ready(entry) => Some(entry),
            Slot::Pending { .. } => None,
        }
    }
}

enum Lookup<V, E, F> {
    Hit(Result<V, E>),
    Started(Computation<V, E>),
    /// Another caller's computation, plus this caller's unused operation in
    /// case the joined outcome turns out to be stale.
    Joined(Computation<V, E>, F),
}

/// Moves a finished computation into its slot when the task ends. If the task
/// unwinds or is dropped before producing an entry, the slot is cleared.
struct SettleOnDrop<V, E> {
    slots: Slots<V, E>,
    key: String,
    id: u64,
    entry: Option<CacheEntry<V, E>>,
}

impl<V, E> Drop for SettleOnDrop<V, E> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(&self.key),
            Some(Slot::Pending { id, .. }) if *id == self.id
        );
        if !current {
            return;
        }

        match self.entry.take() {
            Some(entry) => {
                if let Some(slot) = slots.get_mut(&self.key) {
                    *slot = Slot::Ready(entry);
                }
            }
            None => {
                slots.remove(&self.key);
            }
        }
    }
}

/// Async single-flight cache.
///
/// A miss registers a pending computation under the key before the map lock
/// is released; callers arriving while it runs await that same computation
/// instead of starting their own. The map lock is never held across an
/// `.await`, and a slow operation only delays callers of its own key.
///
/// Operations are spawned onto the Tokio runtime and publish their entry
/// into the cache themselves, so they run to completion and become visible
/// even if every caller stops waiting. Must be used from within a Tokio
/// runtime.
///
/// # Deadlocks
///
/// `operation` is called, and its future spawned, while the map lock is
/// held. The closure itself must not call back into the same cache; the
/// future it returns may.
pub struct AsyncCoalescer<V, E> {
    slots: Slots<V, E>,
    next_id: AtomicU64,
    config: CoalescerConfig,
    counters: Counters,
}

impl<V, E> AsyncCoalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CoalescerConfig::default())
    }

    /// Creates a cache with custom configuration.
    pub fn with_config(config: CoalescerConfig) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::with_capacity(config.initial_capacity))),
            next_id: AtomicU64::new(0),
            config,
            counters: Counters::default(),
        }
    }

    /// Returns the configuration this cache was built with.
    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    /// Returns the outcome cached for `key`, starting `operation` if the key
    /// is absent or stale, or joining the computation already in flight.
    ///
    /// `operation` is only called when this caller starts the computation.
    /// A joined outcome that is already stale when it arrives (a zero TTL,
    /// for instance) is not returned; the caller starts over instead.
    ///
    /// # Panics
    ///
    /// Panics if the operation panicked. Every caller waiting on that
    /// computation panics; the key is then cleared so the next call starts
    /// over.
    #[instrument(level = "debug", skip(self, operation))]
    pub async fn resolve<F, Fut>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut operation = operation;
        loop {
            match self.lookup_or_start(key, ttl, operation) {
                Lookup::Hit(outcome) => return outcome,
                Lookup::Started(computation) => {
                    return collect(key, computation.await).to_outcome();
                }
                Lookup::Joined(computation, unused) => {
                    let entry = collect(key, computation.await);
                    if entry.is_valid() {
                        self.counters.coalesce();
                        return entry.to_outcome();
                    }
                    debug!(key, "Joined outcome already stale, starting over");
                    operation = unused;
                }
            }
        }
    }

    /// Resolves `key` with the configured default TTL.
    pub async fn resolve_default<F, Fut>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.resolve(key, self.config.default_ttl(), operation).await
    }

    /// Like [`AsyncCoalescer::resolve`], but stops waiting after `timeout`.
    ///
    /// Timing out only abandons this caller's wait. The computation keeps
    /// running, is still the single one for its key, and its entry is cached
    /// when it finishes.
    pub async fn resolve_with_timeout<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        timeout: Duration,
        operation: F,
    ) -> CoalesceResult<Result<V, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        tokio::time::timeout(timeout, self.resolve(key, ttl, operation))
            .await
            .map_err(|_| {
                debug!(key, "Gave up waiting for computation");
                CoalesceError::Timeout {
                    millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            })
    }

    fn lookup_or_start<F, Fut>(&self, key: &str, ttl: Duration, operation: F) -> Lookup<V, E, F>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut slots = self.slots.lock();

        match slots.get(key) {
            Some(Slot::Pending { computation, .. }) => {
                trace!(key, "Joining in-flight computation");
                return Lookup::Joined(computation.clone(), operation);
            }
            Some(Slot::Ready(entry)) if entry.is_valid() => {
                self.counters.hit();
                trace!(key, "Cache hit");
                return Lookup::Hit(entry.to_outcome());
            }
            _ => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let computation = spawn_computation(self.slots.clone(), key, id, ttl, operation());
        self.counters.compute();
        slots.insert(
            key.to_owned(),
            Slot::Pending {
                id,
                computation: computation.clone(),
            },
        );
        Lookup::Started(computation)
    }

    /// When the entry for `key` was computed, whether or not it is still valid.
    pub fn computed_at(&self, key: &str) -> Option<Instant> {
        self.slots
            .lock()
            .get(key)
            .and_then(Slot::ready)
            .map(CacheEntry::computed_at)
    }

    /// Returns true while a computation for `key` is running.
    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Pending { .. }))
    }

    /// Returns the number of stored entries, stale ones included. Running
    /// computations are not counted.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.ready().is_some())
            .count()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock();
        let now = Instant::now();
        self.counters.snapshot(
            slots
                .values()
                .filter_map(Slot::ready)
                .map(|e| e.is_valid_at(now)),
        )
    }
}

fn collect<V, E>(key: &str, entry: Option<CacheEntry<V, E>>) -> CacheEntry<V, E> {
    match entry {
        Some(entry) => entry,
        None => panic!("computation for key `{key}` panicked or was cancelled"),
    }
}

fn spawn_computation<V, E, Fut>(
    slots: Slots<V, E>,
    key: &str,
    id: u64,
    ttl: Duration,
    operation: Fut,
) -> Computation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    let mut settle = SettleOnDrop {
        slots,
        key: key.to_owned(),
        id,
        entry: None,
    };
    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let entry = CacheEntry::new(operation.await, ttl);
        debug!(
            key = %settle.key,
            ttl_ms = ttl.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = entry.is_error(),
            "Computed entry"
        );
        settle.entry = Some(entry.clone());
        entry
    });

    async move { handle.await.ok() }.boxed().shared()
}

impl<V, E> Default for AsyncCoalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
