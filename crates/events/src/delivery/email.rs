//! Email notification delivery.
//!
//! [`Notifier`] turns a user event plus its resolved subject and body into one
//! [`OutboundEmail`] and hands it to a [`MailTransport`], once. Real delivery
//! goes through [`SmtpTransport`], which wraps the `lettre` async SMTP
//! transport. When `SMTP_HOST` is not set, [`EmailConfig::from_env`] returns
//! `None` and the process falls back to [`LogTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::event::UserEvent;
use lettre::address::AddressError;

use crate::config::env_or;

/// The mail infrastructure refused or could not take a message.
///
/// Never raised for an invalid event; those fail validation before a
/// notifier is reached.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Connection, authentication or recipient rejection at the SMTP server.
    #[error("mail transport failed: {0}")]
    Transport(String),

    /// Sender or recipient is not a valid mailbox address.
    #[error("invalid mail address: {0}")]
    Address(#[from] AddressError),

    #[error("couldn't build message: {0}")]
    Build(String),
}

impl From<lettre::transport::smtp::Error> for NotifyError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

const DEFAULT_SMTP_PORT: u16 = 587;

/// Sender used when `SMTP_FROM` is not set.
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@herald.local";

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    /// Username and password; authentication is used only when both are set.
    pub credentials: Option<(String, String)>,
}

impl EmailConfig {
    /// Read `SMTP_HOST`, `SMTP_PORT` (`587`), `SMTP_FROM`
    /// (`noreply@herald.local`), `SMTP_USER` and `SMTP_PASSWORD`.
    ///
    /// `None` when `SMTP_HOST` is unset, meaning SMTP delivery is off.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let credentials = match (std::env::var("SMTP_USER"), std::env::var("SMTP_PASSWORD")) {
            (Ok(user), Ok(password)) => Some((user, password)),
            _ => None,
        };

        Some(Self {
            host,
            port: env_or("SMTP_PORT", DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            credentials,
        })
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// A fully composed plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Hands composed messages to the mail infrastructure.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), NotifyError>;
}

/// SMTP delivery via `lettre`, using a STARTTLS relay.
pub struct SmtpTransport {
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let Some((user, password)) = &config.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        use lettre::AsyncTransport;

        let message = build_message(email)?;
        self.mailer.send(message).await?;
        Ok(())
    }
}

/// Assemble the MIME message, rejecting unparseable addresses.
pub fn build_message(email: &OutboundEmail) -> Result<lettre::Message, NotifyError> {
    use lettre::message::header::ContentType;

    lettre::Message::builder()
        .from(email.from.parse()?)
        .to(email.to.parse()?)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| NotifyError::Build(e.to_string()))
}

/// Transport that only logs, for environments without SMTP.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        build_message(email)?;
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "SMTP not configured, email logged instead of sent"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Sends the notification email for a validated event.
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    /// Compose one message to `event.email()` and dispatch it once.
    async fn send(&self, event: &UserEvent, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// [`EmailNotifier`] backed by a [`MailTransport`]. No retries.
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    from_address: String,
}

impl Notifier {
    pub fn new(transport: Arc<dyn MailTransport>, from_address: impl Into<String>) -> Self {
        Self {
            transport,
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl EmailNotifier for Notifier {
    async fn send(&self, event: &UserEvent, subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = OutboundEmail {
            from: self.from_address.clone(),
            to: event.email().to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        if let Err(e) = self.transport.deliver(&email).await {
            tracing::error!(to = %email.to, action = %event.action(), error = %e, "Mail transport rejected notification");
            return Err(e);
        }

        tracing::info!(to = %email.to, action = %event.action(), "Notification email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
            build_message(email)?;
            self.sent.lock().push(email.clone());
            Ok(())
        }
    }

    struct RejectingTransport;

    #[async_trait]
    impl MailTransport for RejectingTransport {
        async fn deliver(&self, _email: &OutboundEmail) -> Result<(), NotifyError> {
            Err(NotifyError::Transport("550 mailbox unavailable".to_string()))
        }
    }

    #[test]
    fn smtp_is_off_without_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(EmailConfig::from_env().is_none());
    }

    #[test]
    fn bad_sender_address_is_rejected_before_transport() {
        let email = OutboundEmail {
            from: "nobody".to_string(),
            to: "a@b.com".to_string(),
            subject: "S".to_string(),
            body: "B".to_string(),
        };
        let err = build_message(&email).unwrap_err();
        assert!(err.to_string().starts_with("invalid mail address"));
    }

    #[tokio::test]
    async fn sends_exactly_one_message_with_resolved_text() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Notifier::new(transport.clone(), DEFAULT_FROM_ADDRESS);

        notifier
            .send(&UserEvent::created("a@b.com"), "S", "B")
            .await
            .expect("delivery should succeed");

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "S");
        assert_eq!(sent[0].body, "B");
        assert_eq!(sent[0].from, DEFAULT_FROM_ADDRESS);
    }

    #[tokio::test]
    async fn unparseable_recipient_is_a_transport_failure() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Notifier::new(transport.clone(), DEFAULT_FROM_ADDRESS);

        let result = notifier
            .send(&UserEvent::created("no at sign"), "S", "B")
            .await;
        assert_matches!(result, Err(NotifyError::Address(_)));
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn transport_rejection_is_surfaced_once() {
        let notifier = Notifier::new(Arc::new(RejectingTransport), DEFAULT_FROM_ADDRESS);
        let result = notifier
            .send(&UserEvent::deleted("a@b.com"), "S", "B")
            .await;
        assert_matches!(result, Err(NotifyError::Transport(msg)) if msg.contains("550"));
    }

    #[tokio::test]
    async fn log_transport_accepts_valid_messages() {
        let email = OutboundEmail {
            from: DEFAULT_FROM_ADDRESS.to_string(),
            to: "a@b.com".to_string(),
            subject: "S".to_string(),
            body: "B".to_string(),
        };
        assert!(LogTransport.deliver(&email).await.is_ok());
    }
}
