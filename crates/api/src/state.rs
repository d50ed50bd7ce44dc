use std::sync::Arc;

use herald_events::{NotificationService, ResilientProducer};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Resolve-then-send path shared with the channel consumer.
    pub notifications: Arc<NotificationService>,
    /// Publisher of user lifecycle events; its breaker is reported by `/health`.
    pub producer: Arc<ResilientProducer>,
}
