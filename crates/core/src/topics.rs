//! Well-known channel names and consumer-group defaults.
//!
//! Producer and consumer sides must agree on these values; they are the
//! fallbacks used when the corresponding environment variables are unset.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Topic carrying JSON-encoded user lifecycle events keyed by action.
pub const USER_EVENTS_TOPIC: &str = "user-events";

/// Consumer group of the notification side.
pub const NOTIFICATION_GROUP_ID: &str = "notification-user-group";

/// Default broker endpoint.
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Where a consumer group without a committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// From the first record still held by the partition.
    #[default]
    Earliest,
    /// Only records produced after the subscription was made.
    Latest,
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetReset::Earliest => f.write_str("earliest"),
            OffsetReset::Latest => f.write_str("latest"),
        }
    }
}

impl FromStr for OffsetReset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(CoreError::field(
                "offset_reset",
                format!("Unknown offset reset policy '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_parses_case_insensitively() {
        assert_eq!("EARLIEST".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert_eq!(" latest ".parse::<OffsetReset>().unwrap(), OffsetReset::Latest);
        assert!("none".parse::<OffsetReset>().is_err());
    }

    #[test]
    fn default_offset_reset_is_earliest() {
        assert_eq!(OffsetReset::default(), OffsetReset::Earliest);
    }
}
