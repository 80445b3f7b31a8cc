//! Error types for the webhook.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Result type alias using the webhook [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while mutating pods or syncing node labels.
#[derive(Debug, Error)]
pub enum Error {
    /// The pod carries no `spec`, so there is nothing to inject into
    #[error("pod has no spec")]
    MissingPodSpec,

    /// The incoming request failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A referenced cluster object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller may not act on the referenced object
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The object exists and is not ours to change
    #[error("conflict: {0}")]
    Conflict(String),

    /// Kubernetes API call failed
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code this error maps to when returned from a handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Kube(_) => StatusCode::BAD_GATEWAY,
            Error::MissingPodSpec
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
