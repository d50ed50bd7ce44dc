#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use herald_core::event::UserEvent;
use herald_core::templates::TemplateTable;
use herald_core::topics::USER_EVENTS_TOPIC;
use herald_events::{
    EmailNotifier, InMemoryChannel, NotificationService, NotifyError, ResilienceConfig,
    ResilientProducer,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use herald_api::config::ServerConfig;
use herald_api::router::build_app_router;
use herald_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        site_name: "test-site".to_string(),
    }
}

/// Notifier double: records every send, or fails each one with a transport
/// error when `failing` is set.
#[derive(Default)]
pub struct StubNotifier {
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub failing: bool,
}

impl StubNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl EmailNotifier for StubNotifier {
    async fn send(&self, event: &UserEvent, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Transport("550 mailbox unavailable".to_string()));
        }
        self.sent.lock().push((
            event.email().to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub notifier: Arc<StubNotifier>,
    pub producer: Arc<ResilientProducer>,
    pub channel: InMemoryChannel,
}

/// Build the full application router around `notifier`, using the same
/// middleware stack as the binary.
pub fn build_test_app(notifier: StubNotifier) -> TestApp {
    let config = test_config();
    let notifier = Arc::new(notifier);
    let channel = InMemoryChannel::new(1);
    let producer = Arc::new(ResilientProducer::new(
        Arc::new(channel.clone()),
        USER_EVENTS_TOPIC,
        ResilienceConfig::default(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        notifications: Arc::new(NotificationService::new(
            Arc::new(TemplateTable::new(&config.site_name)),
            notifier.clone(),
        )),
        producer: Arc::clone(&producer),
    };

    TestApp {
        router: build_app_router(state, &config),
        notifier,
        producer,
        channel,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
