//! Resilience policy.
//!
//! [`RetryPolicy::run`] drives one outer call through
//! `Idle → Attempting → {Succeeded | Retrying | Failed}`. Only retryable
//! fault kinds loop back through `Retrying`; everything else fails on the
//! first attempt. Delays come from [`RetryConfig::delay_for_attempt`] and are
//! awaited with `tokio::time::sleep`, so a waiting call never blocks others.

use crate::config::RetryConfig;
use crate::error::{BridgeResult, FaultKind};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one outer call under the resilience policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt has started.
    Idle,
    /// An attempt is in flight.
    Attempting,
    /// Waiting before the next attempt.
    Retrying,
    /// An attempt returned normally.
    Succeeded,
    /// A fatal fault, or the attempt budget is spent.
    Failed,
}

impl RetryState {
    /// Returns true once the call has resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::Failed)
    }
}

/// Per-call retry bookkeeping, created fresh for every outer call.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempts: u32,
    started: Instant,
    last_failure: Option<FaultKind>,
    state: RetryState,
}

impl RetryContext {
    fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
            last_failure: None,
            state: RetryState::Idle,
        }
    }

    /// Returns the number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the time since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns the classification of the most recent failure.
    pub fn last_failure(&self) -> Option<FaultKind> {
        self.last_failure
    }

    /// Returns the current state.
    pub fn state(&self) -> RetryState {
        self.state
    }
}

/// Observability event emitted on every `Attempting → Retrying` transition.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    /// Operation being retried.
    pub operation: &'a str,
    /// One-based index of the attempt that failed.
    pub attempt: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    /// Classification of the failure.
    pub kind: FaultKind,
    /// Snapshot of the call's retry context.
    pub context: &'a RetryContext,
}

/// Receives retry transitions.
pub trait RetryObserver: Send + Sync {
    /// Called before sleeping ahead of the next attempt.
    fn on_retry(&self, event: &RetryEvent<'_>);
}

/// Logs retry transitions through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        tracing::warn!(
            operation = event.operation,
            attempt = event.attempt,
            delay_ms = millis(event.delay),
            kind = %event.kind,
            elapsed_ms = millis(event.context.elapsed()),
            "retrying after transient fault"
        );
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Retries transient failures with capped exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    observer: Arc<dyn RetryObserver>,
}

impl RetryPolicy {
    /// Creates a policy that logs retries through `tracing`.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingRetryObserver),
        }
    }

    /// Replaces the retry observer.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `attempt` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `attempt` receives the one-based attempt number. The error of the last
    /// attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> BridgeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut ctx = RetryContext::new();
        let budget = self.config.max_attempts.max(1);

        loop {
            ctx.attempts += 1;
            ctx.state = RetryState::Attempting;

            let error = match attempt(ctx.attempts).await {
                Ok(value) => {
                    ctx.state = RetryState::Succeeded;
                    if ctx.attempts > 1 {
                        tracing::debug!(
                            operation,
                            attempts = ctx.attempts,
                            "succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.kind();
            ctx.last_failure = Some(kind);

            if !kind.is_retryable() {
                ctx.state = RetryState::Failed;
                tracing::debug!(operation, kind = %kind, "non-retryable fault");
                return Err(error);
            }

            if ctx.attempts >= budget {
                ctx.state = RetryState::Failed;
                tracing::warn!(
                    operation,
                    attempts = ctx.attempts,
                    kind = %kind,
                    elapsed_ms = millis(ctx.elapsed()),
                    "retry budget exhausted"
                );
                return Err(error);
            }

            let delay = self.config.delay_for_attempt(ctx.attempts - 1);
            ctx.state = RetryState::Retrying;
            self.observer.on_retry(&RetryEvent {
                operation,
                attempt: ctx.attempts,
                delay,
                kind,
                context: &ctx,
            });
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
