//! Hit, coalesced and computation counters behind `stats()`.

use std::sync::atomic::{AtomicU64, Ordering};

use coalesce_core::types::CacheStats;

/// Cumulative call counters. Not part of the locking discipline.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn coalesce(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn compute(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a snapshot from the validity flag of every stored entry.
    pub(crate) fn snapshot<I>(&self, validity: I) -> CacheStats
    where
        I: IntoIterator<Item = bool>,
    {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            ..CacheStats::new()
        };
        for valid in validity {
            stats.total_entries += 1;
            if valid {
                stats.valid_entries += 1;
            } else {
                stats.expired_entries += 1;
            }
        }
        stats
    }
}
