//! Circuit breaker guarding the producer's channel sends.
//!
//! ```text
//! ┌────────┐ failure rate ≥ threshold ┌──────┐ open_duration ┌───────────┐
//! │ Closed ├─────────────────────────►│ Open ├──────────────►│ Half-Open │
//! └────┬───┘                          └──────┘               └─────┬─────┘
//!      ▲                                 ▲     trial failure       │
//!      │                                 └─────────────────────────┤
//!      │               all trial calls succeeded                   │
//!      └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The failure rate is computed over a count-based rolling window holding the
//! outcome of the most recent `window_size` calls, and is only evaluated once
//! at least `minimum_calls` outcomes are recorded. While open, calls are
//! rejected without touching the channel. After `open_duration` the breaker
//! admits `half_open_trials` trial calls and rejects the rest until they
//! resolve.
//!
//! Every state change starts a new generation. [`CircuitBreaker::try_acquire`]
//! hands out a [`Permit`] stamped with the current generation, and outcomes
//! reported with a permit from an earlier generation are ignored, so a slow
//! call admitted while closed can neither close nor reopen a half-open
//! breaker.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::env_or;

/// Configuration for the [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure percentage (0–100) at which a closed breaker opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent call outcomes kept in the rolling window.
    pub window_size: usize,
    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: usize,
    /// How long the breaker stays open before admitting trial calls.
    pub open_duration: Duration,
    /// Trial calls admitted while half-open.
    pub half_open_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            window_size: 10,
            minimum_calls: 5,
            open_duration: Duration::from_secs(30),
            half_open_trials: 1,
        }
    }
}

impl BreakerConfig {
    /// Bring the values into a range the breaker can act on: at least one
    /// outcome in the window, `minimum_calls` no larger than the window (or
    /// the breaker could never open) and at least one trial call.
    pub fn normalized(mut self) -> Self {
        self.window_size = self.window_size.max(1);
        self.minimum_calls = self.minimum_calls.clamp(1, self.window_size);
        self.half_open_trials = self.half_open_trials.max(1);
        self.failure_rate_threshold = self.failure_rate_threshold.clamp(0.0, 100.0);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable                   | Default |
    /// |----------------------------|---------|
    /// | `BREAKER_FAILURE_RATE`     | `50`    |
    /// | `BREAKER_WINDOW_SIZE`      | `10`    |
    /// | `BREAKER_MINIMUM_CALLS`    | `5`     |
    /// | `BREAKER_OPEN_DURATION_MS` | `30000` |
    /// | `BREAKER_HALF_OPEN_TRIALS` | `1`     |
    ///
    /// The result is [`normalized`](Self::normalized).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_rate_threshold: env_or("BREAKER_FAILURE_RATE", defaults.failure_rate_threshold),
            window_size: env_or("BREAKER_WINDOW_SIZE", defaults.window_size),
            minimum_calls: env_or("BREAKER_MINIMUM_CALLS", defaults.minimum_calls),
            open_duration: Duration::from_millis(env_or(
                "BREAKER_OPEN_DURATION_MS",
                defaults.open_duration.as_millis() as u64,
            )),
            half_open_trials: env_or("BREAKER_HALF_OPEN_TRIALS", defaults.half_open_trials),
        }
        .normalized()
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without reaching the channel.
    Open,
    /// A limited number of trial calls test whether the channel recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] when a call is not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is {state}, retry after {retry_after:?}")]
pub struct CallNotPermitted {
    pub state: CircuitState,
    pub retry_after: Duration,
}

/// Permission for one call, returned by [`CircuitBreaker::try_acquire`].
///
/// Pass it back to exactly one of the `record_*` methods.
#[must_use = "report the call's outcome with the permit"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every state change.
    generation: u64,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    trial_successes: u32,
}

impl BreakerInner {
    fn open(&mut self, now: Instant) {
        self.generation += 1;
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trials_in_flight = 0;
        self.trial_successes = 0;
    }

    fn close(&mut self) {
        self.generation += 1;
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trials_in_flight = 0;
        self.trial_successes = 0;
        self.window.clear();
    }

    fn is_current(&self, permit: Permit) -> bool {
        permit.generation == self.generation
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 * 100.0 / self.window.len() as f64
    }

    /// Move an expired open breaker to half-open.
    fn refresh(&mut self, open_duration: Duration, now: Instant) {
        if self.state == CircuitState::Open
            && self
                .opened_at
                .is_some_and(|at| now.duration_since(at) >= open_duration)
        {
            self.generation += 1;
            self.state = CircuitState::HalfOpen;
            self.trials_in_flight = 0;
            self.trial_successes = 0;
        }
    }
}

/// Thread-safe circuit breaker shared by every concurrent publish call of one
/// producer.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker. `config` is [`normalized`](BreakerConfig::normalized)
    /// first.
    pub fn new(config: BreakerConfig) -> Self {
        let config = config.normalized();
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                window: VecDeque::with_capacity(config.window_size),
                opened_at: None,
                trials_in_flight: 0,
                trial_successes: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying an Open→HalfOpen transition if the open
    /// duration has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        inner.refresh(self.config.open_duration, Instant::now());
        inner.state
    }

    /// Ask for permission to make one call.
    ///
    /// A permitted call must be followed by exactly one of
    /// [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`record_abandoned`](Self::record_abandoned), given the returned permit.
    pub fn try_acquire(&self) -> Result<Permit, CallNotPermitted> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.refresh(self.config.open_duration, now);
        if previous != inner.state {
            tracing::warn!(
                from = %previous,
                to = %inner.state,
                open_duration_ms = self.config.open_duration.as_millis() as u64,
                "Circuit breaker state transition: allowing trial calls"
            );
        }

        let permit = Permit {
            generation: inner.generation,
        };
        match inner.state {
            CircuitState::Closed => Ok(permit),
            CircuitState::HalfOpen if inner.trials_in_flight < self.config.half_open_trials => {
                inner.trials_in_flight += 1;
                Ok(permit)
            }
            CircuitState::HalfOpen => Err(CallNotPermitted {
                state: CircuitState::HalfOpen,
                retry_after: Duration::ZERO,
            }),
            CircuitState::Open => {
                let retry_after = inner
                    .opened_at
                    .map(|at| self.config.open_duration.saturating_sub(now.duration_since(at)))
                    .unwrap_or(self.config.open_duration);
                Err(CallNotPermitted {
                    state: CircuitState::Open,
                    retry_after,
                })
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            tracing::debug!("Ignoring success of a call admitted in an earlier breaker state");
            return;
        }
        match inner.state {
            CircuitState::Closed => self.push_outcome(&mut inner, false),
            CircuitState::HalfOpen => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_trials {
                    inner.close();
                    tracing::warn!(
                        from = %CircuitState::HalfOpen,
                        to = %CircuitState::Closed,
                        "Circuit breaker state transition: recovery confirmed"
                    );
                }
            }
            // No permit is issued while open.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if !inner.is_current(permit) {
            tracing::debug!("Ignoring failure of a call admitted in an earlier breaker state");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                self.push_outcome(&mut inner, true);
                let rate = inner.failure_rate();
                if inner.window.len() >= self.config.minimum_calls
                    && rate >= self.config.failure_rate_threshold
                {
                    inner.open(Instant::now());
                    tracing::warn!(
                        from = %CircuitState::Closed,
                        to = %CircuitState::Open,
                        failure_rate = rate,
                        threshold = self.config.failure_rate_threshold,
                        "Circuit breaker state transition: channel marked unavailable"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open(Instant::now());
                tracing::warn!(
                    from = %CircuitState::HalfOpen,
                    to = %CircuitState::Open,
                    "Circuit breaker state transition: trial call failed, reopening"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a permit whose call never produced an outcome (for example
    /// because shutdown interrupted it).
    pub fn record_abandoned(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if inner.is_current(permit) && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Failure percentage over the current rolling window.
    pub fn failure_rate(&self) -> f64 {
        self.inner.lock().failure_rate()
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failed: bool) {
        if inner.window.len() == self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(failed);
    }
}
