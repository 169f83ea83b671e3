//! Cache configuration.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coalesce_core::constants::{
    DEFAULT_INITIAL_CAPACITY, DEFAULT_TTL_MS, ENV_DEFAULT_TTL_MS, ENV_INITIAL_CAPACITY,
};
use coalesce_core::error::{CoalesceError, Result};

/// Configuration shared by every cache strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// TTL used by `resolve_default`, in milliseconds
    pub default_ttl_ms: u64,
    /// Number of key slots to preallocate
    pub initial_capacity: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl CoalescerConfig {
    /// Sets the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the number of preallocated key slots.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// The default TTL as a `Duration`.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Checks that the configuration is usable.
    ///
    /// A zero default TTL is rejected: it would make `resolve_default`
    /// recompute on every call.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_ms == 0 {
            return Err(CoalesceError::ConfigError(
                "default TTL must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Builds a configuration from `COALESCE_*` environment variables,
    /// falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_DEFAULT_TTL_MS) {
            config.default_ttl_ms = parse_setting(ENV_DEFAULT_TTL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_INITIAL_CAPACITY) {
            config.initial_capacity = parse_setting(ENV_INITIAL_CAPACITY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_setting<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| CoalesceError::invalid_setting(name, raw, e.to_string()))
}
