//! Defaults and environment variable names shared across the workspace.

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default TTL applied by `resolve_default`, in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Default number of key slots preallocated by a new cache.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Overrides [`DEFAULT_TTL_MS`].
pub const ENV_DEFAULT_TTL_MS: &str = "COALESCE_DEFAULT_TTL_MS";

/// Overrides [`DEFAULT_INITIAL_CAPACITY`].
pub const ENV_INITIAL_CAPACITY: &str = "COALESCE_INITIAL_CAPACITY";
