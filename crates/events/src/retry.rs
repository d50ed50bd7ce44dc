//! Bounded retry with exponential backoff.

use std::time::Duration;

use crate::config::env_or;

/// How many times the producer tries a send and how long it waits between
/// attempts.
///
/// The delay after failed attempt `n` (1-based) is
/// `initial_backoff * multiplier^(n-1)`, capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Load the policy from environment variables.
    ///
    /// | Variable                      | Default |
    /// |-------------------------------|---------|
    /// | `PRODUCER_MAX_ATTEMPTS`       | `3`     |
    /// | `PRODUCER_INITIAL_BACKOFF_MS` | `500`   |
    /// | `PRODUCER_BACKOFF_MULTIPLIER` | `2.0`   |
    /// | `PRODUCER_MAX_BACKOFF_MS`     | `5000`  |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_or("PRODUCER_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            initial_backoff: Duration::from_millis(env_or(
                "PRODUCER_INITIAL_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )),
            multiplier: env_or("PRODUCER_BACKOFF_MULTIPLIER", defaults.multiplier).max(1.0),
            max_backoff: Duration::from_millis(env_or(
                "PRODUCER_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
