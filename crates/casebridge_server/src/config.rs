//! Server configuration.

use crate::error::{ConfigError, ConfigResult};
use casebridge_core::{BridgeConfig, RetryConfig};
use std::time::Duration;

/// Header consulted for the caller id when no identity claim is present.
pub const DEFAULT_CALLER_HEADER: &str = "x-caller-id";

/// Configuration for the case service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bridge configuration: retry budget, backoff and per-call timeout.
    pub bridge: BridgeConfig,
    /// Whether sanitized errors carry the original message.
    ///
    /// Leave off in production.
    pub diagnostic_mode: bool,
    /// Header name for a caller-supplied identity.
    pub caller_header: String,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            diagnostic_mode: false,
            caller_header: DEFAULT_CALLER_HEADER.to_string(),
        }
    }

    /// Sets the bridge configuration.
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.bridge.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.bridge.call_timeout = timeout;
        self
    }

    /// Enables or disables diagnostic mode.
    pub fn with_diagnostic_mode(mut self, enabled: bool) -> Self {
        self.diagnostic_mode = enabled;
        self
    }

    /// Sets the caller header name.
    pub fn with_caller_header(mut self, header: impl Into<String>) -> Self {
        self.caller_header = header.into();
        self
    }

    /// Checks that the configuration can be used.
    pub fn validate(&self) -> ConfigResult<()> {
        let retry = &self.bridge.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttemptBudget);
        }
        if self.bridge.call_timeout.is_zero() {
            return Err(ConfigError::ZeroCallTimeout);
        }
        if retry.max_delay < retry.initial_delay {
            return Err(ConfigError::DelayCapBelowBase {
                initial: retry.initial_delay,
                max: retry.max_delay,
            });
        }
        if self.caller_header.trim().is_empty() {
            return Err(ConfigError::EmptyCallerHeader);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(!config.diagnostic_mode);
        assert_eq!(config.caller_header, DEFAULT_CALLER_HEADER);
        assert_eq!(config.bridge.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_retry(RetryConfig::new(5))
            .with_call_timeout(Duration::from_secs(2))
            .with_diagnostic_mode(true)
            .with_caller_header("x-user");

        assert_eq!(config.bridge.retry.max_attempts, 5);
        assert_eq!(config.bridge.call_timeout, Duration::from_secs(2));
        assert!(config.diagnostic_mode);
        assert_eq!(config.caller_header, "x-user");
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert_eq!(
            ServerConfig::new().with_retry(RetryConfig::new(0)).validate(),
            Err(ConfigError::ZeroAttemptBudget)
        );
        assert_eq!(
            ServerConfig::new()
                .with_call_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroCallTimeout)
        );
        assert!(matches!(
            ServerConfig::new()
                .with_retry(RetryConfig::new(3).with_max_delay(Duration::from_millis(10)))
                .validate(),
            Err(ConfigError::DelayCapBelowBase { .. })
        ));
        assert_eq!(
            ServerConfig::new().with_caller_header(" ").validate(),
            Err(ConfigError::EmptyCallerHeader)
        );
    }
}
