//! Herald user event pipeline.
//!
//! This crate provides the moving parts between the user service and the
//! mailbox:
//!
//! - [`channel`]: the partitioned, at-least-once message channel abstraction
//!   and its in-process implementation [`InMemoryChannel`].
//! - [`ResilientProducer`]: publishes user events with retries, per-attempt
//!   timeouts and a shared [`CircuitBreaker`]; never surfaces an error.
//! - [`ValidatingConsumer`]: pulls events, validates them and drives
//!   [`NotificationService`] with an explicit [`CommitMode`].
//! - [`delivery`]: email composition and SMTP transport.

pub mod breaker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod producer;
pub mod retry;
pub mod service;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use channel::{Channel, ChannelError, InMemoryChannel, Record, Subscription};
pub use config::ChannelConfig;
pub use consumer::{CommitMode, ConsumeError, ValidatingConsumer};
pub use delivery::email::{
    EmailConfig, EmailNotifier, LogTransport, MailTransport, Notifier, NotifyError, SmtpTransport,
};
pub use producer::{PublishOutcome, ResilienceConfig, ResilientProducer};
pub use retry::RetryPolicy;
pub use service::{DispatchError, NotificationService};
