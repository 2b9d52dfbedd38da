// src/error.rs
// Error taxonomy for the runtime plus the HTTP-facing error response type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised by the handler-facing runtime API.
///
/// Handler code that lets these escape sees them converted into a single
/// terminal `error` frame by the stream controller; they never surface as
/// raw stack traces on the wire.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no active session context")]
    NoActiveContext,

    #[error("no active stream for this context")]
    NoActiveStream,

    #[error("bubble not found: {0}")]
    BubbleNotFound(String),

    #[error("stream already active for this conversation")]
    StreamAlreadyAttached,
}

/// Error response for the JSON endpoints.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::StreamAlreadyAttached => ApiError::conflict(err.to_string()),
            RuntimeError::BubbleNotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            _ => ApiError::bad_request(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_conflict_maps_to_409() {
        let api: ApiError = RuntimeError::StreamAlreadyAttached.into();
        assert_eq!(api.status, StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_config_maps_to_400() {
        let api: ApiError = RuntimeError::InvalidConfig("colors".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert!(api.message.contains("colors"));
    }
}
