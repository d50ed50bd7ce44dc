//! Integration tests for `POST /emails`.

mod common;

use axum::http::StatusCode;
use common::{body_json, body_text, build_test_app, post_json, StubNotifier};
use herald_api::error::MAIL_FAILURE_MESSAGE;
use herald_api::routes::emails::EMAIL_SENT_MESSAGE;
use herald_core::event::{UserAction, ACTION_REQUIRED_MESSAGE, EMAIL_INVALID_MESSAGE};
use herald_core::templates::{MessageResolver, TemplateTable};

// ---------------------------------------------------------------------------
// Test: a valid event is dispatched and answered with 200
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_event_sends_email_and_returns_200() {
    let app = build_test_app(StubNotifier::default());
    let response = post_json(
        app.router,
        "/emails",
        r#"{"action":"CREATED","email":"test@test.com"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, EMAIL_SENT_MESSAGE);

    let table = TemplateTable::new("test-site");
    let sent = app.notifier.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "test@test.com");
    assert_eq!(sent[0].1, table.resolve_subject(UserAction::Created).unwrap());
    assert_eq!(sent[0].2, table.resolve_text(UserAction::Created).unwrap());
}

// ---------------------------------------------------------------------------
// Test: validation failures return 400 with a field map and send nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_event_returns_field_map_and_never_notifies() {
    let app = build_test_app(StubNotifier::default());
    let response = post_json(
        app.router,
        "/emails",
        r#"{"action":null,"email":"invalidEmail"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["action"], ACTION_REQUIRED_MESSAGE);
    assert_eq!(json["email"], EMAIL_INVALID_MESSAGE);
    assert_eq!(app.notifier.count(), 0);
}

#[tokio::test]
async fn missing_fields_are_reported_per_field() {
    let app = build_test_app(StubNotifier::default());
    let response = post_json(app.router, "/emails", "{}").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["action"].is_string());
    assert!(json["email"].is_string());
}

#[tokio::test]
async fn unknown_action_is_a_validation_failure() {
    let app = build_test_app(StubNotifier::default());
    let response = post_json(
        app.router,
        "/emails",
        r#"{"action":"SUSPENDED","email":"a@b.com"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["action"].as_str().unwrap().contains("SUSPENDED"));
    assert!(json.get("email").is_none());
    assert_eq!(app.notifier.count(), 0);
}

#[tokio::test]
async fn malformed_body_is_reported_against_body() {
    let app = build_test_app(StubNotifier::default());
    let response = post_json(app.router, "/emails", "not json").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["body"].is_string());
}

// ---------------------------------------------------------------------------
// Test: transport failures return 418 with the fixed message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transport_failure_returns_418() {
    let app = build_test_app(StubNotifier::failing());
    let response = post_json(
        app.router,
        "/emails",
        r#"{"action":"DELETED","email":"any@email.com"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_text(response).await, MAIL_FAILURE_MESSAGE);
}

// ---------------------------------------------------------------------------
// Test: only POST is routed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_on_emails_is_not_allowed() {
    let app = build_test_app(StubNotifier::default());
    let response = common::get(app.router, "/emails").await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
