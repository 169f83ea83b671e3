//! # Coalesce Cache
//!
//! Single-flight TTL result caches: for any key, an expensive operation runs
//! at most once per validity window no matter how many callers ask for it
//! concurrently, and every caller receives the same outcome. Failures are
//! cached exactly like successes.
//!
//! Three strategies share the same guarantees:
//!
//! - [`Coalescer`]: one global read/write lock, double-checked on a miss
//! - [`KeyedCoalescer`]: the same algorithm with one lock per key
//! - [`AsyncCoalescer`]: latecomers await the computation already in flight
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use coalesce_cache::Coalescer;
//!
//! let cache: Coalescer<u64, String> = Coalescer::new();
//! let ttl = Duration::from_secs(30);
//!
//! let first = cache.resolve("user:42", ttl, || Ok(42));
//! // Served from the cache; the operation is not called again.
//! let second = cache.resolve("user:42", ttl, || Ok(0));
//! assert_eq!(first, second);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cache;
mod config;
mod counters;
mod entry;
mod flight;
mod keyed;

#[cfg(test)]
mod tests;

pub use cache::Coalescer;
pub use config::CoalescerConfig;
pub use entry::CacheEntry;
pub use flight::AsyncCoalescer;
pub use keyed::KeyedCoalescer;

// Re-export the shared interface from core
pub use coalesce_core::{CacheStats, Coalesce, CoalesceError};
