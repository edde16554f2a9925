//! Application error types
//!
//! Every layer below the routes returns typed errors; this module is the only
//! place where errors are mapped to HTTP. All non-2xx responses share the
//! wire shape `{"error":{"code":<int>,"message":<string>}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// HTTP-facing error taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    /// Input violates a request constraint; the message is safe to return
    /// verbatim.
    #[error("{0}")]
    Validation(String),

    /// Input or output exceeds a configured byte limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The token store has not completed a successful load yet.
    #[error("token store not ready")]
    AuthNotReady,

    /// The presented API key is unknown.
    #[error("invalid api key")]
    AuthInvalid,

    #[error("Too Many Requests")]
    RateExceeded,

    /// Pool acquire or render exceeded its deadline.
    #[error("PDF rendering took too long")]
    RenderTimeout,

    /// The browser session died twice in a row; the pool restart did not
    /// recover the request.
    #[error("Chrome session interrupted")]
    SessionInterrupted,

    #[error("Not Found")]
    NotFound,

    /// Sanitized internal failure; the raw cause is logged, never returned.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AuthNotReady => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AuthInvalid => StatusCode::UNAUTHORIZED,
            AppError::RateExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::RenderTimeout => StatusCode::REQUEST_TIMEOUT,
            AppError::SessionInterrupted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), message = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
