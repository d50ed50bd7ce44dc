use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use herald_core::event::parse_user_event;

use crate::error::AppResult;
use crate::state::AppState;

/// Body of the `200` response.
pub const EMAIL_SENT_MESSAGE: &str = "Email sent, check your inbox";

/// POST /emails -- validate a user event and send its notification directly.
///
/// The body is taken as raw bytes so that a missing or `null` action is
/// reported in the field map rather than rejected by the JSON extractor.
async fn send_email(State(state): State<AppState>, body: Bytes) -> AppResult<&'static str> {
    let event = parse_user_event(&body)?;
    tracing::info!(action = %event.action(), to = %event.email(), "Email requested over HTTP");

    state.notifications.notify_user(&event).await?;
    Ok(EMAIL_SENT_MESSAGE)
}

/// Mount the email routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/emails", post(send_email))
}
