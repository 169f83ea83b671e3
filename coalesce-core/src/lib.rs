//! # Coalesce Core
//!
//! Core types, errors, and traits for the coalescing single-flight cache.
//!
//! This crate provides the building blocks shared by every cache strategy:
//!
//! - **Traits**: [`Coalesce`], the blocking resolve interface
//! - **Types**: [`CacheStats`] snapshots
//! - **Errors**: [`CoalesceError`] for configuration and bounded waits
//! - **Constants**: defaults and environment variable names
//!
//! ## Example
//!
//! ```rust
//! use coalesce_core::CacheStats;
//!
//! let stats = CacheStats::new();
//! assert_eq!(stats.requests(), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{CoalesceError, Result};
pub use traits::*;
pub use types::*;
