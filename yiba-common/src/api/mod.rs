//! Shared API types and the error-to-HTTP boundary

pub mod types;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::Error;
use types::ErrorBody;

impl IntoResponse for Error {
    /// Boundary translation of the error taxonomy to HTTP.
    ///
    /// Internal failures return a generic body; details are logged
    /// server-side only.
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            Error::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded".to_string(),
            ),
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                error!("internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody::new(message, code))).into_response()
    }
}
