//! A single cached outcome.

use std::time::{Duration, Instant};

/// One computed outcome for one key.
///
/// The operation's success value and its error are stored together as a
/// `Result`; an `Err` is cached exactly like an `Ok` and served until it
/// expires.
#[derive(Clone, Debug)]
pub struct CacheEntry<V, E> {
    outcome: Result<V, E>,
    computed_at: Instant,
    ttl: Duration,
}

impl<V, E> CacheEntry<V, E> {
    /// Wraps an outcome that completed just now.
    pub fn new(outcome: Result<V, E>, ttl: Duration) -> Self {
        Self::with_timestamp(outcome, Instant::now(), ttl)
    }

    /// Wraps an outcome that completed at `computed_at`.
    pub fn with_timestamp(outcome: Result<V, E>, computed_at: Instant, ttl: Duration) -> Self {
        Self {
            outcome,
            computed_at,
            ttl,
        }
    }

    /// Returns true while the entry may still be served.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Validity as seen at `now`.
    ///
    /// A zero TTL is never valid, so it turns every lookup into a miss.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        !self.ttl.is_zero() && now.saturating_duration_since(self.computed_at) <= self.ttl
    }

    /// Returns true once the entry must be recomputed.
    pub fn is_expired(&self) -> bool {
        !self.is_valid()
    }

    /// The stored outcome.
    pub fn outcome(&self) -> &Result<V, E> {
        &self.outcome
    }

    /// Returns true if the operation failed.
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// When the operation completed.
    pub fn computed_at(&self) -> Instant {
        self.computed_at
    }

    /// The TTL passed by the call that computed this entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time elapsed since the operation completed.
    pub fn age(&self) -> Duration {
        self.computed_at.elapsed()
    }
}

impl<V: Clone, E: Clone> CacheEntry<V, E> {
    /// Clones the stored outcome for a caller.
    pub fn to_outcome(&self) -> Result<V, E> {
        self.outcome.clone()
    }
}
