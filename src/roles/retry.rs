//! # In-pass Retry
//!
//! Linear backoff for transient secret and catalog failures within a pass.

use std::time::Duration;

/// Bounded retry with a linearly growing pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    /// Pause after the first failure; the n-th failure waits n times as long
    pub step: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step,
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    #[must_use]
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }

    /// Pause before the attempt following attempt number `attempt`
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }

    /// Sleep for `delay_after(attempt)`
    pub async fn pause(&self, attempt: u32) {
        tokio::time::sleep(self.delay_after(attempt)).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_RETRY_ATTEMPTS,
            Duration::from_millis(crate::constants::DEFAULT_RETRY_STEP_MS),
        )
    }
}
