//! Error types for Docker API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hatchway_core::CoreError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for Docker API operations.
pub type Result<T> = std::result::Result<T, DockerError>;

/// Errors that can occur in Docker API operations.
///
/// Only raised before a stream starts. Once a 200 or 101 status line is on
/// the wire, failures end the stream instead.
#[derive(Debug, Error)]
pub enum DockerError {
    /// Container not found.
    #[error("No such container: {0}")]
    ContainerNotFound(String),

    /// Exec instance not found or already started.
    #[error("No such exec instance: {0}")]
    ExecNotFound(String),

    /// Invalid parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Conflict (e.g., container not running).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Not implemented.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl DockerError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ContainerNotFound(_) | Self::ExecNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl From<CoreError> for DockerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => Self::ContainerNotFound(what),
            CoreError::InvalidState(msg) | CoreError::AlreadyExists(msg) => Self::Conflict(msg),
            CoreError::Config(msg) => Self::InvalidParameter(msg),
            CoreError::Unsupported(msg) => Self::NotImplemented(msg),
            other @ (CoreError::Runtime(_) | CoreError::Io(_)) => Self::Server(other.to_string()),
        }
    }
}

/// Docker API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub message: String,
}

impl IntoResponse for DockerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_docker_status() {
        let cases = [
            (CoreError::not_found("c1"), StatusCode::NOT_FOUND),
            (CoreError::invalid_state("stopped"), StatusCode::CONFLICT),
            (CoreError::config("bad"), StatusCode::BAD_REQUEST),
            (CoreError::runtime("spawn"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                CoreError::Io(std::io::Error::other("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (core, status) in cases {
            assert_eq!(DockerError::from(core).status_code(), status);
        }
    }

    #[test]
    fn exec_not_found_message() {
        let err = DockerError::ExecNotFound("abc".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "No such exec instance: abc");
    }
}
