//! Domain types shared by every cache strategy.

mod stats;

pub use stats::*;
