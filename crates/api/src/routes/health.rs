use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use herald_events::CircuitState;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// State of the producer's circuit breaker (`closed`, `open`, `half-open`).
    pub breaker: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /health -- `ok`, or `degraded` while the producer's breaker is open.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let breaker = state.producer.breaker().state();
    let status = if breaker == CircuitState::Open { "degraded" } else { "ok" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        breaker: breaker.to_string(),
        timestamp: Utc::now(),
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
