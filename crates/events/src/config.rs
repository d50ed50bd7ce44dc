//! Channel configuration and environment helpers shared by the producer,
//! consumer, and delivery modules.

use std::str::FromStr;

use herald_core::topics::{
    OffsetReset, DEFAULT_BOOTSTRAP_SERVERS, NOTIFICATION_GROUP_ID, USER_EVENTS_TOPIC,
};

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: u32 = 3;

/// Read `key` from the environment and parse it, falling back to `default`
/// when the variable is unset.
///
/// Surrounding whitespace is ignored. Panics if the variable is set but
/// unparseable; misconfiguration should fail fast at startup.
pub fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => default,
    }
}

fn parse_value<T>(key: &str, raw: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}"))
}

/// Where and how the notification side attaches to the event channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Broker connection endpoint.
    pub bootstrap_servers: String,
    /// Topic carrying user lifecycle events.
    pub topic: String,
    /// Consumer group id of the notification side.
    pub group_id: String,
    /// Starting position for a group without a committed offset.
    pub offset_reset: OffsetReset,
    /// Partition count used when a topic is created.
    pub partitions: u32,
}

impl ChannelConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                    | Default                   |
    /// |-----------------------------|---------------------------|
    /// | `CHANNEL_BOOTSTRAP_SERVERS` | `localhost:9092`          |
    /// | `CHANNEL_TOPIC`             | `user-events`             |
    /// | `CHANNEL_GROUP_ID`          | `notification-user-group` |
    /// | `CHANNEL_OFFSET_RESET`      | `earliest`                |
    /// | `CHANNEL_PARTITIONS`        | `3`                       |
    pub fn from_env() -> Self {
        Self {
            bootstrap_servers: std::env::var("CHANNEL_BOOTSTRAP_SERVERS")
                .unwrap_or_else(|_| DEFAULT_BOOTSTRAP_SERVERS.to_string()),
            topic: std::env::var("CHANNEL_TOPIC").unwrap_or_else(|_| USER_EVENTS_TOPIC.to_string()),
            group_id: std::env::var("CHANNEL_GROUP_ID")
                .unwrap_or_else(|_| NOTIFICATION_GROUP_ID.to_string()),
            offset_reset: env_or("CHANNEL_OFFSET_RESET", OffsetReset::Earliest),
            partitions: env_or("CHANNEL_PARTITIONS", DEFAULT_PARTITIONS).max(1),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            topic: USER_EVENTS_TOPIC.to_string(),
            group_id: NOTIFICATION_GROUP_ID.to_string(),
            offset_reset: OffsetReset::Earliest,
            partitions: DEFAULT_PARTITIONS,
        }
    }
}
