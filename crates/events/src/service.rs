//! Resolve-then-send for a validated user event.
//!
//! Shared by the channel consumer and the HTTP `/emails` endpoint so both
//! paths produce identical messages and errors.

use std::sync::Arc;

use herald_core::error::CoreError;
use herald_core::event::UserEvent;
use herald_core::templates::MessageResolver;

use crate::delivery::email::{EmailNotifier, NotifyError};

/// Error type for [`NotificationService::notify_user`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The resolver had no text for the event's action.
    #[error(transparent)]
    Template(CoreError),

    /// The mail transport refused the message.
    #[error(transparent)]
    Transport(#[from] NotifyError),
}

/// Turns a validated [`UserEvent`] into one sent email.
pub struct NotificationService {
    resolver: Arc<dyn MessageResolver>,
    notifier: Arc<dyn EmailNotifier>,
}

impl NotificationService {
    pub fn new(resolver: Arc<dyn MessageResolver>, notifier: Arc<dyn EmailNotifier>) -> Self {
        Self { resolver, notifier }
    }

    /// Resolve the subject and body for the event's action and send them,
    /// in that order, on the calling task.
    pub async fn notify_user(&self, event: &UserEvent) -> Result<(), DispatchError> {
        let subject = self
            .resolver
            .resolve_subject(event.action())
            .map_err(DispatchError::Template)?;
        let body = self
            .resolver
            .resolve_text(event.action())
            .map_err(DispatchError::Template)?;

        self.notifier.send(event, &subject, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use herald_core::event::UserAction;
    use herald_core::templates::TemplateTable;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl EmailNotifier for CapturingNotifier {
        async fn send(&self, event: &UserEvent, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .push((event.email().to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn sends_resolved_subject_and_body() {
        let table = TemplateTable::empty()
            .with_template(UserAction::Created, "S", "B")
            .with_template(UserAction::Deleted, "S2", "B2");
        let notifier = Arc::new(CapturingNotifier::default());
        let service = NotificationService::new(Arc::new(table), notifier.clone());

        service
            .notify_user(&UserEvent::created("a@b.com"))
            .await
            .unwrap();

        assert_eq!(
            *notifier.sent.lock(),
            vec![("a@b.com".to_string(), "S".to_string(), "B".to_string())]
        );
    }

    #[tokio::test]
    async fn unmapped_action_never_reaches_the_notifier() {
        let table = TemplateTable::empty().with_template(UserAction::Created, "S", "B");
        let notifier = Arc::new(CapturingNotifier::default());
        let service = NotificationService::new(Arc::new(table), notifier.clone());

        let result = service.notify_user(&UserEvent::deleted("a@b.com")).await;
        assert_matches!(result, Err(DispatchError::Template(CoreError::UnmappedAction(_))));
        assert!(notifier.sent.lock().is_empty());
    }
}
