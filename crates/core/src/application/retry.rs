// Retry logic: bounded retries for dispatch-level failures only
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::constants::{DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY};
use crate::domain::{EnvironmentSpec, ErrorKind, ExecutionRequest, ExecutionResult};
use crate::port::TaskExecutor;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry(Duration),
    /// Return the current result as-is
    Stop,
}

/// Retry policy
///
/// Determines if an attempt should be repeated based on:
/// - The failure tag (only ProvisioningFailed / Timeout retry)
/// - Attempts made so far against the environment's max_retries
///
/// Delays grow exponentially from `base_delay` and are capped at `max_delay`,
/// so the schedule is bounded and never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
    /// ```
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// No delay between attempts (tests, interactive use)
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempts_made + 1`
    ///
    /// delay = min(base_delay * 2^(attempts_made - 1), max_delay)
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Decide whether to run another attempt
    ///
    /// Pure function of the failure tag and counters.
    pub fn should_retry(
        &self,
        failure: Option<ErrorKind>,
        attempts_made: u32,
        max_retries: u32,
    ) -> RetryDecision {
        match failure {
            Some(kind) if kind.is_retryable() && attempts_made <= max_retries => {
                RetryDecision::Retry(self.delay_after(attempts_made))
            }
            _ => RetryDecision::Stop,
        }
    }
}

/// Wraps a TaskExecutor with the retry policy
pub struct RetryController {
    executor: Arc<dyn TaskExecutor>,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(executor: Arc<dyn TaskExecutor>, policy: RetryPolicy) -> Self {
        Self { executor, policy }
    }

    /// Run up to `1 + spec.max_retries` attempts
    ///
    /// Returns the last attempt's result with `attempt_count` set.
    pub async fn dispatch(&self, spec: &EnvironmentSpec, request: &ExecutionRequest) -> ExecutionResult {
        let mut attempts_made = 0u32;

        loop {
            attempts_made += 1;
            let mut result = self.executor.execute(spec, request).await;
            result.attempt_count = attempts_made;

            match self
                .policy
                .should_retry(result.error_kind(), attempts_made, spec.max_retries)
            {
                RetryDecision::Retry(delay) => {
                    warn!(
                        source_id = %spec.source_id,
                        attempt = attempts_made,
                        max_attempts = spec.max_attempts(),
                        kind = ?result.error_kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Dispatch-level failure, scheduling retry"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryDecision::Stop => {
                    if attempts_made > 1 {
                        info!(
                            source_id = %spec.source_id,
                            attempts = attempts_made,
                            success = result.success,
                            "Dispatch finished after retries"
                        );
                    }
                    return result;
                }
            }
        }
    }
}
