//! Configuration for the bridge.

use rand::Rng;
use std::time::Duration;

/// Configuration for bridge calls.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Bounded wait for a single attempt.
    pub call_timeout: Duration,
    /// Rows buffered ahead of a streaming consumer.
    pub stream_buffer: usize,
}

impl BridgeConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(30),
            stream_buffer: 32,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the streaming read-ahead buffer.
    pub fn with_stream_buffer(mut self, rows: usize) -> Self {
        self.stream_buffer = rows;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Whether to add up to 25% jitter on top of the computed delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay after the failed attempt with zero-based index `attempt`.
    ///
    /// The delay is `min(initial_delay * 2^attempt, max_delay)`. Jitter only
    /// ever adds to that value and is clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);

        if self.add_jitter {
            let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..=0.25));
            delay.saturating_add(jitter).min(self.max_delay)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
