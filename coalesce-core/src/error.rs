//! Error types for the coalescing cache.
//!
//! `resolve` never produces errors of its own: whatever the caller's operation
//! returns is cached and handed back verbatim. The errors here cover the
//! surfaces around it, namely configuration and bounded waits.

use thiserror::Error;

/// Result type alias using `CoalesceError`.
pub type Result<T> = std::result::Result<T, CoalesceError>;

/// Errors raised by the cache itself (never by a resolved operation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoalesceError {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A configuration value could not be parsed or is out of range.
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidSetting {
        /// Setting name, usually the environment variable
        name: String,
        /// Raw value as supplied
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration is internally inconsistent.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // WAIT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The caller stopped waiting for an in-flight computation.
    ///
    /// The computation itself keeps running for the other waiters.
    #[error("Timed out after {millis}ms waiting for computation")]
    Timeout {
        /// How long the caller waited
        millis: u64,
    },
}

impl CoalesceError {
    /// Builds an [`CoalesceError::InvalidSetting`].
    pub fn invalid_setting(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoalesceError::InvalidSetting {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CoalesceError::InvalidSetting { .. } | CoalesceError::ConfigError(_)
        )
    }

    /// Returns true if retrying the call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoalesceError::Timeout { .. })
    }
}
