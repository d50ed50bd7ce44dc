//! Best-effort publisher of user lifecycle events.
//!
//! [`ResilientProducer`] is called right after a user mutation has been
//! committed. Every send goes through a [`CircuitBreaker`] and is retried per
//! a [`RetryPolicy`]; whatever happens, the failure is logged and swallowed so
//! the caller's already-successful mutation is never affected. A crash between
//! the caller's commit and a successful send loses the notification; there is
//! no transactional outbox.

use std::sync::Arc;
use std::time::Duration;

use herald_core::event::UserEvent;
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerConfig, CallNotPermitted, CircuitBreaker};
use crate::channel::{Channel, ChannelError};
use crate::config::env_or;
use crate::retry::RetryPolicy;

/// Default upper bound for a single send attempt.
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry, timeout and breaker settings of a [`ResilientProducer`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    /// Upper bound for one send; a slower channel counts as a failed attempt.
    pub attempt_timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            breaker: BreakerConfig::default(),
        }
    }
}

impl ResilienceConfig {
    /// Load configuration from environment variables.
    ///
    /// See [`RetryPolicy::from_env`] and [`BreakerConfig::from_env`];
    /// additionally `PRODUCER_ATTEMPT_TIMEOUT_MS` (default `5000`).
    pub fn from_env() -> Self {
        Self {
            retry: RetryPolicy::from_env(),
            attempt_timeout: Duration::from_millis(env_or(
                "PRODUCER_ATTEMPT_TIMEOUT_MS",
                DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64,
            )),
            breaker: BreakerConfig::from_env(),
        }
    }
}

// ---------------------------------------------------------------------------
// PublishOutcome
// ---------------------------------------------------------------------------

/// What happened to a published event. None of these is an error for the
/// caller; the value exists for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The channel accepted the event.
    Delivered {
        partition: u32,
        offset: u64,
        attempts: u32,
    },
    /// Every attempt failed; the event was dropped.
    RetriesExhausted { attempts: u32 },
    /// The breaker rejected the call before it reached the channel.
    BreakerOpen { attempts: u32 },
    /// Shutdown interrupted publishing; the event was dropped.
    Cancelled { attempts: u32 },
    /// The event could not be encoded; the event was dropped.
    Unencodable,
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }
}

// ---------------------------------------------------------------------------
// ResilientProducer
// ---------------------------------------------------------------------------

/// Publishes [`UserEvent`]s with retry, circuit breaking and a logging
/// fallback.
///
/// One instance owns one breaker; share it via `Arc<ResilientProducer>`
/// between all request handlers that publish.
pub struct ResilientProducer {
    channel: Arc<dyn Channel>,
    topic: String,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    breaker: CircuitBreaker,
    shutdown: CancellationToken,
}

impl ResilientProducer {
    pub fn new(channel: Arc<dyn Channel>, topic: impl Into<String>, config: ResilienceConfig) -> Self {
        Self {
            channel,
            topic: topic.into(),
            retry: config.retry,
            attempt_timeout: config.attempt_timeout,
            breaker: CircuitBreaker::new(config.breaker),
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort in-flight retries when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a `CREATED` event for `email`.
    pub async fn user_created(&self, email: &str) -> PublishOutcome {
        self.publish(&UserEvent::created(email)).await
    }

    /// Publish a `DELETED` event for `email`.
    pub async fn user_deleted(&self, email: &str) -> PublishOutcome {
        self.publish(&UserEvent::deleted(email)).await
    }

    /// Publish `event` keyed by its action. Never fails.
    pub async fn publish(&self, event: &UserEvent) -> PublishOutcome {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(email = %event.email(), error = %e, "Couldn't encode user event");
                return PublishOutcome::Unencodable;
            }
        };

        let mut last_error: Option<ChannelError> = None;

        for attempt in 1..=self.retry.max_attempts {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejected) => return self.fallback_breaker_open(event, attempt - 1, rejected),
            };

            let send = self.channel.send(&self.topic, event.key(), payload.clone());
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.breaker.record_abandoned(permit);
                    return self.fallback_cancelled(event, attempt);
                }
                result = tokio::time::timeout(self.attempt_timeout, send) => result,
            };

            match result.unwrap_or(Err(ChannelError::Timeout(self.attempt_timeout))) {
                Ok(metadata) => {
                    self.breaker.record_success(permit);
                    tracing::info!(
                        action = %event.action(),
                        email = %event.email(),
                        partition = metadata.partition,
                        offset = metadata.offset,
                        attempt,
                        "User event sent to channel"
                    );
                    return PublishOutcome::Delivered {
                        partition: metadata.partition,
                        offset: metadata.offset,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    self.breaker.record_failure(permit);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        action = %event.action(),
                        error = %e,
                        "User event publish attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.backoff(attempt);
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        return self.fallback_cancelled(event, attempt);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::error!(
            email = %event.email(),
            action = %event.action(),
            attempts = self.retry.max_attempts,
            error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Couldn't send user event to channel, notification dropped"
        );
        PublishOutcome::RetriesExhausted {
            attempts: self.retry.max_attempts,
        }
    }

    fn fallback_breaker_open(
        &self,
        event: &UserEvent,
        attempts: u32,
        rejected: CallNotPermitted,
    ) -> PublishOutcome {
        tracing::error!(
            email = %event.email(),
            action = %event.action(),
            attempts,
            retry_after_ms = rejected.retry_after.as_millis() as u64,
            "Circuit breaker rejected user event, notification dropped"
        );
        PublishOutcome::BreakerOpen { attempts }
    }

    fn fallback_cancelled(&self, event: &UserEvent, attempts: u32) -> PublishOutcome {
        tracing::warn!(
            email = %event.email(),
            action = %event.action(),
            attempts,
            "Shutdown interrupted user event publish, notification dropped"
        );
        PublishOutcome::Cancelled { attempts }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use herald_core::topics::USER_EVENTS_TOPIC;

    use super::*;
    use crate::breaker::CircuitState;
    use crate::channel::InMemoryChannel;

    fn config(max_attempts: u32, minimum_calls: usize) -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(100),
                multiplier: 2.0,
                max_backoff: Duration::from_secs(1),
            },
            attempt_timeout: Duration::from_secs(1),
            breaker: BreakerConfig {
                failure_rate_threshold: 100.0,
                window_size: minimum_calls,
                minimum_calls,
                open_duration: Duration::from_secs(10),
                half_open_trials: 1,
            },
        }
    }

    fn producer(channel: &InMemoryChannel, config: ResilienceConfig) -> ResilientProducer {
        ResilientProducer::new(Arc::new(channel.clone()), USER_EVENTS_TOPIC, config)
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_channel_delivers_on_first_attempt() {
        let channel = InMemoryChannel::new(1);
        let producer = producer(&channel, config(3, 5));

        let outcome = producer.user_created("a@b.com").await;
        assert_matches!(outcome, PublishOutcome::Delivered { attempts: 1, .. });

        let records = channel.records(USER_EVENTS_TOPIC);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "CREATED");
        let body: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(body, serde_json::json!({"action": "CREATED", "email": "a@b.com"}));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_channel_is_swallowed_after_retries() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = producer(&channel, config(3, 10));

        let outcome = producer.user_deleted("a@b.com").await;
        assert_eq!(outcome, PublishOutcome::RetriesExhausted { attempts: 3 });
        assert_eq!(channel.send_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_retry() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = producer(&channel, config(3, 10));

        let flip = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flip.set_available(true);
        });

        let outcome = producer.user_created("a@b.com").await;
        assert_matches!(outcome, PublishOutcome::Delivered { attempts: 2, .. });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_counts_as_failed_attempt() {
        let channel = InMemoryChannel::new(1);
        channel.set_send_delay(Some(Duration::from_secs(5)));
        let producer = producer(&channel, config(2, 10));

        let outcome = producer.user_created("a@b.com").await;
        assert_eq!(outcome, PublishOutcome::RetriesExhausted { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_short_circuits() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = producer(&channel, config(1, 3));

        for _ in 0..3 {
            producer.user_created("a@b.com").await;
        }
        assert_eq!(producer.breaker().state(), CircuitState::Open);
        assert_eq!(channel.send_attempts(), 3);

        let outcome = producer.user_created("a@b.com").await;
        assert_eq!(outcome, PublishOutcome::BreakerOpen { attempts: 0 });
        assert_eq!(channel.send_attempts(), 3, "open breaker must not reach the channel");
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trial_after_cool_down_closes_on_success() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = producer(&channel, config(1, 2));
        producer.user_created("a@b.com").await;
        producer.user_created("a@b.com").await;
        assert_eq!(producer.breaker().state(), CircuitState::Open);

        channel.set_available(true);
        tokio::time::advance(Duration::from_secs(10)).await;

        let outcome = producer.user_created("a@b.com").await;
        assert!(outcome.is_delivered());
        assert_eq!(producer.breaker().state(), CircuitState::Closed);
        assert_eq!(channel.send_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opening_mid_retry_stops_retrying() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = producer(&channel, config(5, 2));

        let outcome = producer.user_created("a@b.com").await;
        assert_eq!(outcome, PublishOutcome::BreakerOpen { attempts: 2 });
        assert_eq!(channel.send_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let shutdown = CancellationToken::new();
        let mut cfg = config(5, 10);
        cfg.retry.initial_backoff = Duration::from_secs(60);
        let producer = Arc::new(producer(&channel, cfg).with_shutdown(shutdown.clone()));

        let task = {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move { producer.user_created("a@b.com").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();

        let outcome = task.await.unwrap();
        assert_eq!(outcome, PublishOutcome::Cancelled { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_publishers_share_one_breaker() {
        let channel = InMemoryChannel::new(1);
        channel.set_available(false);
        let producer = Arc::new(producer(&channel, config(1, 4)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let producer = Arc::clone(&producer);
                tokio::spawn(async move { producer.user_created(&format!("u{i}@b.com")).await })
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(!outcome.is_delivered());
        }

        assert_eq!(producer.breaker().state(), CircuitState::Open);
        assert_eq!(channel.send_attempts(), 4);
    }
}
