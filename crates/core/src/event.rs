//! User lifecycle events and their wire format.
//!
//! A [`UserEvent`] is published every time a user is created or deleted and
//! travels over the channel as `{"action": "CREATED", "email": "..."}`, keyed
//! by its action name. Events are validated where they are consumed, not where
//! they are built: the consumer decodes into a [`UserEventDraft`] and calls
//! [`UserEventDraft::validate`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

use crate::error::{CoreError, FieldErrors};

/// Message reported when the `action` field is missing or `null`.
pub const ACTION_REQUIRED_MESSAGE: &str = "User event action must not be empty";

/// Message reported when the `email` field is missing or malformed.
pub const EMAIL_INVALID_MESSAGE: &str = "Check the email address for correctness";

// ---------------------------------------------------------------------------
// UserAction
// ---------------------------------------------------------------------------

/// The lifecycle action a [`UserEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserAction {
    Created,
    Deleted,
}

impl UserAction {
    /// Every defined action, in declaration order.
    pub const ALL: [UserAction; 2] = [UserAction::Created, UserAction::Deleted];

    /// Wire name, also used as the channel partition key.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Created => "CREATED",
            UserAction::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CoreError::UnmappedAction(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// UserEvent
// ---------------------------------------------------------------------------

/// An immutable user lifecycle event.
///
/// Two events with equal fields are interchangeable; there is no
/// deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserEvent {
    action: UserAction,
    email: String,
}

impl UserEvent {
    pub fn new(action: UserAction, email: impl Into<String>) -> Self {
        Self {
            action,
            email: email.into(),
        }
    }

    pub fn created(email: impl Into<String>) -> Self {
        Self::new(UserAction::Created, email)
    }

    pub fn deleted(email: impl Into<String>) -> Self {
        Self::new(UserAction::Deleted, email)
    }

    pub fn action(&self) -> UserAction {
        self.action
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Channel partition key for this event.
    pub fn key(&self) -> &'static str {
        self.action.as_str()
    }

    /// Encode as the JSON wire payload.
    pub fn to_json(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|e| CoreError::Internal(e.to_string()))
    }
}

impl fmt::Display for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.action, self.email)
    }
}

// ---------------------------------------------------------------------------
// UserEventDraft
// ---------------------------------------------------------------------------

/// A user event exactly as decoded from the wire, before validation.
///
/// Both fields are optional and `action` is kept as raw JSON so that a
/// `null`, missing, or unknown action surfaces as a field violation instead of
/// a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserEventDraft {
    #[serde(default)]
    pub action: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserEventDraft {
    /// Decode a raw JSON payload.
    ///
    /// A body that is not a JSON object at all is reported against the
    /// `body` field.
    pub fn from_slice(payload: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(payload)
            .map_err(|e| CoreError::field("body", format!("Malformed user event: {e}")))
    }

    /// Check every field and build the validated event.
    ///
    /// All violations are collected, so a payload with both a bad action and
    /// a bad email reports both.
    pub fn validate(self) -> Result<UserEvent, CoreError> {
        let mut errors = FieldErrors::new();

        let action = match self.action {
            None | Some(serde_json::Value::Null) => {
                errors.add("action", ACTION_REQUIRED_MESSAGE);
                None
            }
            Some(serde_json::Value::String(name)) => match name.parse::<UserAction>() {
                Ok(action) => Some(action),
                Err(_) => {
                    errors.add("action", format!("Unknown user event action '{name}'"));
                    None
                }
            },
            Some(other) => {
                errors.add(
                    "action",
                    format!("User event action must be a string, got {other}"),
                );
                None
            }
        };

        let email = match self.email {
            Some(email) if !email.trim().is_empty() && email.validate_email() => Some(email),
            _ => {
                errors.add("email", EMAIL_INVALID_MESSAGE);
                None
            }
        };

        match (action, email) {
            (Some(action), Some(email)) if errors.is_empty() => Ok(UserEvent::new(action, email)),
            _ => Err(CoreError::Validation(errors)),
        }
    }
}

/// Decode and validate a raw wire payload in one step.
pub fn parse_user_event(payload: &[u8]) -> Result<UserEvent, CoreError> {
    UserEventDraft::from_slice(payload)?.validate()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
