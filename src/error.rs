//! Error handling and custom error types
//!
//! Every failure a task can produce is one variant of [`Error`]. The gateway
//! maps each variant to a fixed HTTP status and a JSON envelope of the form
//! `{"status": "error", "error": <kind>, "message": <detail>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Structurally malformed request: missing field, wrong type, bad JSON.
    #[error("{0}")]
    Validation(String),

    /// Well-formed request whose content an adapter cannot work with.
    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("No route for {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The route exists but its provider is not usable (missing credential).
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    UpstreamTimeout(String),

    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds an [`Error::Upstream`] that records the provider's HTTP status.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Name used in the `error` field of the response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Input(_) => "InputError",
            Error::PayloadTooLarge(_) => "PayloadTooLargeError",
            Error::NotFound(_) => "NotFoundError",
            Error::MethodNotAllowed(_) => "MethodNotAllowedError",
            Error::Configuration(_) => "ConfigurationError",
            Error::UpstreamTimeout(_) => "UpstreamTimeoutError",
            Error::Http(e) if e.is_timeout() => "UpstreamTimeoutError",
            Error::Upstream { .. } | Error::Http(_) | Error::Serialization(_) => "UpstreamError",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Input(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Http(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Error::Upstream { .. } | Error::Http(_) | Error::Serialization(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal faults never expose their detail.
    pub fn public_message(&self) -> String {
        match self {
            Error::Io(_) | Error::Internal(_) => "Internal server error".to_string(),
            Error::Http(e) if e.is_timeout() => "Upstream request timed out".to_string(),
            Error::Http(_) => "Upstream request failed".to_string(),
            Error::Upstream {
                status: Some(status),
                message,
            } => format!("{} (upstream status {})", message, status),
            other => other.to_string(),
        }
    }
}

/// Body of every error response.
pub fn error_envelope(kind: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "error": kind,
        "message": message,
    })
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", self.kind(), self);
        } else {
            tracing::debug!("Request rejected ({}): {}", self.kind(), self);
        }

        let body = error_envelope(self.kind(), &self.public_message());
        (status, Json(body)).into_response()
    }
}
