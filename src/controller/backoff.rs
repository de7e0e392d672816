//! # Fibonacci Backoff
//!
//! Progressive requeue delays for clusters whose pass keeps failing.
//! Grows more slowly than exponential backoff, so a primary that is briefly
//! unreachable is retried soon while a broken one is not hammered.
//!
//! ## Usage
//!
//! ```rust
//! use managed_roles_controller::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(30), Duration::from_secs(300));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(90));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting from `min` and capped
/// at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` and never exceeding `max`
    ///
    /// Sub-second parts are dropped; a zero `min` is raised to one second.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_secs = min.as_secs().max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max.as_secs().max(min_secs),
        }
    }

    /// Return the current delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        result
    }

    /// Return the current delay and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful pass
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(minutes(1), minutes(10));

        // 1m, 1m, 2m, 3m, 5m, 8m, 10m (max)
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(delays, vec![60, 60, 120, 180, 300, 480, 600]);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(minutes(1), minutes(10));
        for _ in 0..7 {
            backoff.next_backoff_seconds();
        }
        // 8m + 10m would be 18m
        assert_eq!(backoff.next_backoff_seconds(), 600);
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(minutes(1), minutes(10));
        for _ in 0..4 {
            backoff.next_backoff_seconds();
        }

        backoff.reset();

        assert_eq!(backoff.next_backoff(), minutes(1));
        assert_eq!(backoff.next_backoff(), minutes(1));
        assert_eq!(backoff.next_backoff(), minutes(2));
    }

    #[test]
    fn test_zero_minimum_is_raised() {
        let mut backoff = FibonacciBackoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
        assert_eq!(backoff.next_backoff_seconds(), 1);
    }

    #[test]
    fn test_backoff_state_is_independent_per_instance() {
        let mut first = FibonacciBackoff::new(minutes(1), minutes(10));
        let mut second = first.clone();

        first.next_backoff_seconds();
        first.next_backoff_seconds();
        assert_eq!(first.next_backoff_seconds(), 120);
        assert_eq!(second.next_backoff_seconds(), 60);
    }
}
