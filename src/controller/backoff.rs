//! # Exponential Backoff
//!
//! Bounded exponential backoff used to requeue workloads whose reconciliation
//! failed with a retryable error.
//!
//! The delay doubles after every consecutive failure and is capped at the
//! configured maximum. A successful reconciliation resets the sequence.
//!
//! ## Usage
//!
//! ```rust
//! use config_rollout_controller::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(5, 60);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 20);
//! assert_eq!(backoff.next_backoff_seconds(), 40);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates backoff durations that double on every call, starting at
/// `min_secs` and never exceeding `max_secs`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First backoff value in seconds (for reset)
    min_secs: u64,
    /// Value returned by the next call in seconds
    current_secs: u64,
    /// Maximum backoff value in seconds
    max_secs: u64,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given first and maximum delay in seconds
    ///
    /// A zero `min_secs` is treated as one second so the sequence still grows.
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        let max_secs = max_secs.max(min_secs);
        Self {
            min_secs,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        self.current_secs = self.current_secs.saturating_mul(2).min(self.max_secs);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current_secs = self.min_secs;
    }
}
