//! Common traits for coalescing caches.
//!
//! Consumers take a cache through a generic `C: Coalesce<V, E>` parameter
//! rather than reaching for a shared global, so every logical cache is an
//! explicit instance with its own isolated state.

use std::time::Duration;

use crate::types::CacheStats;

// ═══════════════════════════════════════════════════════════════════════════════
// COALESCE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A blocking single-flight cache over outcomes of type `Result<V, E>`.
///
/// Implementations guarantee that for any key, at most one `operation` is in
/// flight, and that all callers arriving during one staleness episode observe
/// the same outcome.
pub trait Coalesce<V, E>: Send + Sync
where
    V: Clone,
    E: Clone,
{
    /// Returns the cached outcome for `key`, computing it with `operation` if
    /// the key is absent or its entry is older than its TTL.
    ///
    /// Errors from `operation` are cached like successes and returned
    /// unchanged until they expire.
    fn resolve<F>(&self, key: &str, ttl: Duration, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>;

    /// Same as [`Coalesce::resolve`] with the cache's configured default TTL.
    fn resolve_default<F>(&self, key: &str, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>;

    /// Returns a snapshot of entry counts and hit/miss counters.
    fn stats(&self) -> CacheStats;
}
