//! Error types for the server layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for configuration checks.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A server configuration that cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The retry budget allows no attempt at all.
    #[error("retry budget must allow at least one attempt")]
    ZeroAttemptBudget,

    /// The per-attempt timeout is zero.
    #[error("call timeout must be greater than zero")]
    ZeroCallTimeout,

    /// The backoff cap is below the base delay.
    #[error("max retry delay {max:?} is below initial delay {initial:?}")]
    DelayCapBelowBase {
        /// Configured base delay.
        initial: Duration,
        /// Configured cap.
        max: Duration,
    },

    /// The caller header name is empty.
    #[error("caller header name must not be empty")]
    EmptyCallerHeader,
}

/// A caller identity lookup that failed.
///
/// Never surfaces to callers: identity resolution degrades to `"unknown"`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// A header value is not valid text.
    #[error("header {0} is not valid text")]
    InvalidHeader(String),

    /// The identity source could not be read.
    #[error("identity source unavailable: {0}")]
    Unavailable(String),
}
