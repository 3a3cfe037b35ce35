//! Exponential retry backoff.

use std::time::Duration;

use crate::config::FetchConfig;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`.
pub fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Tracks attempts within one fetch cycle.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl RetryBackoff {
    /// Create a backoff from a fetch configuration.
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            base: config.base_delay,
            max: config.max_delay,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once
    /// the attempt limit is reached.
    pub fn backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.max_attempts {
            return None;
        }
        Some(retry_delay(self.base, self.max, self.attempt))
    }

    /// Start a new cycle (e.g. after a successful fetch).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts so far in this cycle.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt limit is reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfigBuilder;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(retry_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(base, max, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(base, max, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(base, max, 5), Duration::from_secs(16));
    }

    #[test]
    fn test_retry_delay_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(retry_delay(base, max, 6), max);
        assert_eq!(retry_delay(base, max, 100), max);
    }

    #[test]
    fn test_backoff_exhausts() {
        let config = FetchConfigBuilder::new().max_attempts(3).build().unwrap();
        let mut backoff = RetryBackoff::new(&config);

        assert_eq!(backoff.backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.backoff(), None);
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let config = FetchConfigBuilder::new().max_attempts(1).build().unwrap();
        let mut backoff = RetryBackoff::new(&config);
        assert_eq!(backoff.backoff(), None);
    }
}
