//! Retry policies for throttled and split batches.

use std::time::Duration;

use docdb_core::StatusCode;
use rand::Rng;

use super::operation::OperationContext;
use super::response::OperationResult;
use crate::config::ThrottlingRetryConfig;

/// Calculates the next backoff duration with jitter applied.
pub(crate) fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    std::cmp::min(
        Duration::from_secs_f64((base_backoff * jitter_factor).max(0.0)),
        max_backoff,
    )
}

/// Tracks the throttle retries of one logical batch.
///
/// A service-provided retry-after is honored as is; otherwise an exponential
/// jittered backoff is used. Retries stop once the attempt count or the
/// cumulative wait would exceed the policy.
#[derive(Debug)]
pub struct ThrottleBackoff {
    config: ThrottlingRetryConfig,
    attempts: u32,
    waited: Duration,
    current: Duration,
}

impl ThrottleBackoff {
    /// Starts tracking with `config`.
    pub fn new(config: ThrottlingRetryConfig) -> Self {
        let current = config.initial_backoff();
        Self {
            config,
            attempts: 0,
            waited: Duration::ZERO,
            current,
        }
    }

    /// Returns the delay before the next retry, or `None` when exhausted.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts() {
            return None;
        }

        let delay = match retry_after {
            Some(hint) => hint,
            None => {
                let delay = calculate_backoff_with_jitter(
                    self.current,
                    1.0,
                    self.config.max_backoff(),
                    self.config.jitter(),
                );
                self.current = calculate_backoff_with_jitter(
                    self.current,
                    self.config.multiplier(),
                    self.config.max_backoff(),
                    0.0,
                );
                delay
            }
        };

        if self.waited + delay > self.config.max_wait() {
            return None;
        }

        self.attempts += 1;
        self.waited += delay;
        Some(delay)
    }

    /// Returns the retries granted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the cumulative delay granted so far.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// What to do with a retryable result in bulk mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-resolve routing with a refreshed map and re-enqueue.
    Reroute,
    /// Wait, then re-enqueue on the same range.
    Backoff(Duration),
    /// Complete the operation with the result as is.
    Complete,
}

/// Per-operation retry bounds for bulk execution.
#[derive(Debug, Clone)]
pub struct BulkRetryPolicy {
    max_retries: u32,
    throttling: ThrottlingRetryConfig,
}

impl BulkRetryPolicy {
    /// Creates a policy allowing `max_retries` per operation for each cause.
    pub fn new(max_retries: u32, throttling: ThrottlingRetryConfig) -> Self {
        Self {
            max_retries,
            throttling,
        }
    }

    /// Decides how to handle `result`, bumping the context's retry counters.
    pub fn decide(&self, context: &OperationContext, result: &OperationResult) -> RetryAction {
        if docdb_core::status::is_split(result.status_code, result.sub_status_code) {
            if context.next_split_retry() <= self.max_retries {
                return RetryAction::Reroute;
            }
            return RetryAction::Complete;
        }

        if result.status_code == StatusCode::TOO_MANY_REQUESTS {
            let attempt = context.next_throttle_retry();
            if attempt <= self.max_retries {
                let delay = result.retry_after.unwrap_or_else(|| {
                    let mut backoff = self.throttling.initial_backoff();
                    for _ in 1..attempt {
                        backoff = calculate_backoff_with_jitter(
                            backoff,
                            self.throttling.multiplier(),
                            self.throttling.max_backoff(),
                            0.0,
                        );
                    }
                    calculate_backoff_with_jitter(
                        backoff,
                        1.0,
                        self.throttling.max_backoff(),
                        self.throttling.jitter(),
                    )
                });
                return RetryAction::Backoff(delay);
            }
        }

        RetryAction::Complete
    }
}
