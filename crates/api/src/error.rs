use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_core::error::CoreError;
use herald_events::service::DispatchError;
use serde_json::json;

/// Body of the `418` response when the mail transport refuses a message.
pub const MAIL_FAILURE_MESSAGE: &str =
    "Failed to send email: check the recipient address and try again later";

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] so handlers can return `AppResult<T>`:
///
/// - validation failures become `400` with a `{field: message}` JSON map,
/// - transport failures become `418` with [`MAIL_FAILURE_MESSAGE`] as plain text,
/// - everything else becomes a sanitized `500`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `herald_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Resolving or sending the notification failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Core(CoreError::Validation(errors)) => {
                tracing::warn!(errors = %errors, "Validation failed");
                (StatusCode::BAD_REQUEST, axum::Json(errors.into_map())).into_response()
            }
            AppError::Dispatch(DispatchError::Transport(err)) => {
                tracing::error!(error = %err, "Mail transport failure");
                (StatusCode::IM_A_TEAPOT, MAIL_FAILURE_MESSAGE).into_response()
            }
            AppError::Dispatch(DispatchError::Template(err)) | AppError::Core(err) => {
                tracing::error!(error = %err, "Internal error");
                let body = json!({
                    "error": "An internal error occurred",
                    "code": "INTERNAL_ERROR",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
            }
        }
    }
}
