//! Cache statistics.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a cache's entries and counters.
///
/// Entry counts are computed when the snapshot is taken; counters are
/// cumulative since the cache was created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of keys with a stored entry (valid or stale)
    pub total_entries: usize,
    /// Entries still inside their TTL
    pub valid_entries: usize,
    /// Entries past their TTL, waiting to be replaced
    pub expired_entries: usize,
    /// Calls served by the fast path
    pub hits: u64,
    /// Calls served by an entry another caller produced while this one waited
    pub coalesced: u64,
    /// Times an operation was actually invoked
    pub computations: u64,
}

impl CacheStats {
    /// Creates empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of calls observed.
    pub fn requests(&self) -> u64 {
        self.hits + self.coalesced + self.computations
    }

    /// Fraction of calls that did not invoke the operation, in `[0.0, 1.0]`.
    ///
    /// Returns `0.0` before the first call.
    pub fn reuse_ratio(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }
        (self.hits + self.coalesced) as f64 / requests as f64
    }
}
