//! Notification subject and body templates per lifecycle action.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::event::UserAction;

/// Site name interpolated into the default bodies when none is configured.
pub const DEFAULT_SITE_NAME: &str = "user-service";

/// Resolves the human-readable text for a lifecycle action.
///
/// Implementations must be pure: the same action always yields the same text.
/// An action without a mapping is an error, never an empty string.
pub trait MessageResolver: Send + Sync {
    fn resolve_subject(&self, action: UserAction) -> Result<String, CoreError>;

    fn resolve_text(&self, action: UserAction) -> Result<String, CoreError>;
}

/// Subject and body for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

/// Fixed lookup table from action to [`Template`].
#[derive(Debug, Clone)]
pub struct TemplateTable {
    entries: HashMap<UserAction, Template>,
}

impl TemplateTable {
    /// The standard table covering every [`UserAction`].
    pub fn new(site_name: &str) -> Self {
        let entries = UserAction::ALL
            .into_iter()
            .map(|action| (action, default_template(action, site_name)))
            .collect();
        Self { entries }
    }

    /// A table with no mappings, to be filled with [`with_template`](Self::with_template).
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace the template for `action`.
    pub fn with_template(
        mut self,
        action: UserAction,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            action,
            Template {
                subject: subject.into(),
                body: body.into(),
            },
        );
        self
    }

    pub fn get(&self, action: UserAction) -> Result<&Template, CoreError> {
        self.entries
            .get(&action)
            .ok_or_else(|| CoreError::UnmappedAction(action.to_string()))
    }

    /// Actions from [`UserAction::ALL`] that this table has no template for.
    pub fn missing_actions(&self) -> Vec<UserAction> {
        UserAction::ALL
            .into_iter()
            .filter(|action| !self.entries.contains_key(action))
            .collect()
    }
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::new(DEFAULT_SITE_NAME)
    }
}

impl MessageResolver for TemplateTable {
    fn resolve_subject(&self, action: UserAction) -> Result<String, CoreError> {
        self.get(action).map(|t| t.subject.clone())
    }

    fn resolve_text(&self, action: UserAction) -> Result<String, CoreError> {
        self.get(action).map(|t| t.body.clone())
    }
}

fn default_template(action: UserAction, site_name: &str) -> Template {
    let (subject, body) = match action {
        UserAction::Created => (
            "User account created".to_string(),
            format!("Hello! Your account on the '{site_name}' site has been successfully created."),
        ),
        UserAction::Deleted => (
            "User account deleted".to_string(),
            format!("Hello! Your account on the '{site_name}' site has been deleted."),
        ),
    };
    Template { subject, body }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_table_covers_every_action() {
        assert!(TemplateTable::default().missing_actions().is_empty());
    }

    #[test]
    fn subjects_are_non_empty_and_distinct() {
        let table = TemplateTable::default();
        let created = table.resolve_subject(UserAction::Created).unwrap();
        let deleted = table.resolve_subject(UserAction::Deleted).unwrap();
        assert!(!created.is_empty());
        assert!(!deleted.is_empty());
        assert_ne!(created, deleted);
    }

    #[test]
    fn bodies_mention_site_name() {
        let table = TemplateTable::new("acme");
        for action in UserAction::ALL {
            assert!(table.resolve_text(action).unwrap().contains("'acme'"));
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let table = TemplateTable::default();
        assert_eq!(
            table.resolve_text(UserAction::Deleted).unwrap(),
            table.resolve_text(UserAction::Deleted).unwrap()
        );
    }

    #[test]
    fn unmapped_action_fails_loudly() {
        let table = TemplateTable::empty().with_template(UserAction::Created, "S", "B");
        assert_eq!(table.resolve_subject(UserAction::Created).unwrap(), "S");
        assert_matches!(
            table.resolve_subject(UserAction::Deleted),
            Err(CoreError::UnmappedAction(name)) if name == "DELETED"
        );
        assert_matches!(
            table.resolve_text(UserAction::Deleted),
            Err(CoreError::UnmappedAction(_))
        );
        assert_eq!(table.missing_actions(), vec![UserAction::Deleted]);
    }
}
