//! Error types for chatrelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Request-level errors surfaced to the client before streaming begins.
///
/// Once the relay has started streaming there is no structured error channel:
/// an upstream interruption simply ends the client stream, so it is not a
/// variant here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("Invalid request body: {0}")]
    MalformedRequest(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    UpstreamRejection { status: u16, message: String },
}

impl Error {
    /// The HTTP status reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MalformedRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UpstreamRejection { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Rejections carry upstream's extracted message verbatim; everything
        // else reports its own description.
        let message = match &self {
            Error::UpstreamRejection { message, .. } => message.clone(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
