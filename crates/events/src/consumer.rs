//! Validating consumer of the user events topic.
//!
//! [`ValidatingConsumer::run`] is an explicit pull loop: poll one record,
//! validate it, resolve its text, send the email, commit. Exactly one record
//! is in flight at a time, so records of a partition are handled in order.
//!
//! When the read position is committed is chosen with [`CommitMode`]:
//!
//! - [`CommitMode::AfterDispatch`] (default) commits once handling finished.
//!   A crash while sending leaves the record uncommitted and it is delivered
//!   again, possibly producing a duplicate email (at-least-once).
//! - [`CommitMode::BeforeDispatch`] commits as soon as the record is read.
//!   A crash while sending loses the notification (at-most-once). A record
//!   whose commit fails is not dispatched, since it will be delivered again.
//!
//! Records that fail validation or whose email is refused by the transport are
//! committed as well; this subsystem never retries them on its own.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use herald_core::error::{CoreError, FieldErrors};
use herald_core::event::{parse_user_event, UserEvent};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, Record, Subscription};
use crate::config::env_or;
use crate::service::{DispatchError, NotificationService};

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// CommitMode
// ---------------------------------------------------------------------------

/// When the consumer commits its read position relative to sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Commit after handling; at-least-once delivery.
    #[default]
    AfterDispatch,
    /// Commit before handling; at-most-once delivery.
    BeforeDispatch,
}

impl CommitMode {
    /// Read `CONSUMER_COMMIT_MODE` (default `after-dispatch`).
    pub fn from_env() -> Self {
        env_or("CONSUMER_COMMIT_MODE", CommitMode::default())
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitMode::AfterDispatch => f.write_str("after-dispatch"),
            CommitMode::BeforeDispatch => f.write_str("before-dispatch"),
        }
    }
}

impl FromStr for CommitMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after-dispatch" | "at-least-once" => Ok(CommitMode::AfterDispatch),
            "before-dispatch" | "at-most-once" => Ok(CommitMode::BeforeDispatch),
            other => Err(CoreError::field(
                "commit_mode",
                format!("Unknown commit mode '{other}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ConsumeError
// ---------------------------------------------------------------------------

/// Why a record could not be turned into a sent email.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// The record is not a valid user event. Nothing was resolved or sent.
    #[error("Invalid user event: {0}")]
    Validation(FieldErrors),

    /// The event was valid but resolving or sending failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<CoreError> for ConsumeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(errors) => ConsumeError::Validation(errors),
            other => {
                let mut errors = FieldErrors::new();
                errors.add("body", other.to_string());
                ConsumeError::Validation(errors)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ValidatingConsumer
// ---------------------------------------------------------------------------

/// Drives [`NotificationService`] from channel records.
pub struct ValidatingConsumer {
    service: Arc<NotificationService>,
    commit_mode: CommitMode,
}

impl ValidatingConsumer {
    pub fn new(service: Arc<NotificationService>, commit_mode: CommitMode) -> Self {
        Self {
            service,
            commit_mode,
        }
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// Validate one record and, if valid, send its notification.
    ///
    /// Validation happens before anything else: an invalid record never
    /// reaches the resolver or the notifier.
    pub async fn handle(&self, record: &Record) -> Result<UserEvent, ConsumeError> {
        tracing::info!(
            key = %record.key,
            partition = record.partition,
            offset = record.offset,
            "Received user event"
        );

        let event = parse_user_event(&record.payload).map_err(|e| {
            tracing::error!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "User event failed validation"
            );
            ConsumeError::from(e)
        })?;

        self.service.notify_user(&event).await?;
        Ok(event)
    }

    /// Run until `cancel` fires or the subscription closes.
    ///
    /// Cancellation is only observed while waiting for a record; a record
    /// already being handled is finished and committed first. The subscription
    /// is closed on exit so its partitions can be taken over.
    pub async fn run(self, mut subscription: Box<dyn Subscription>, cancel: CancellationToken) {
        tracing::info!(
            partitions = ?subscription.assignment(),
            commit_mode = %self.commit_mode,
            "User event consumer started"
        );

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = subscription.poll() => polled,
            };

            match polled {
                Ok(record) => self.process(subscription.as_mut(), &record).await,
                Err(ChannelError::Closed) => {
                    tracing::warn!("Subscription closed, user event consumer stopping");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll user events");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        subscription.close().await;
        tracing::info!("User event consumer stopped, partitions released");
    }

    async fn process(&self, subscription: &mut dyn Subscription, record: &Record) {
        if self.commit_mode == CommitMode::BeforeDispatch
            && commit(subscription, record).await.is_err()
        {
            tracing::warn!(
                partition = record.partition,
                offset = record.offset,
                "User event not dispatched, its offset could not be committed"
            );
            return;
        }

        match self.handle(record).await {
            Ok(event) => {
                tracing::debug!(action = %event.action(), offset = record.offset, "User event handled");
            }
            Err(e) => {
                tracing::error!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "User event processing aborted, not retried"
                );
            }
        }

        if self.commit_mode == CommitMode::AfterDispatch {
            // Failure is logged; the record is redelivered.
            let _ = commit(subscription, record).await;
        }
    }
}

async fn commit(subscription: &mut dyn Subscription, record: &Record) -> Result<(), ChannelError> {
    subscription.commit(record).await.inspect_err(|e| {
        tracing::warn!(
            partition = record.partition,
            offset = record.offset,
            error = %e,
            "Failed to commit user event offset"
        );
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
