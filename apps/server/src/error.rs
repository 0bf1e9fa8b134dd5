//! Error types for the relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_models::ResourceRef;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Absent from every source. Callers usually proceed without it.
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transient transport failure: {0}")]
    TransientTransport(String),

    /// Destination still reports a missing dependency after the single retry
    #[error("Missing dependency {missing} for {resource}")]
    MissingDependency {
        resource: ResourceRef,
        missing: ResourceRef,
    },

    #[error("Destination rejected {resource} ({status}): {diagnostics}")]
    ValidationRejected {
        resource: ResourceRef,
        status: u16,
        diagnostics: String,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Run cancelled before {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::TransientTransport(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::MissingDependency { .. }
            | Error::ValidationRejected { .. }
            | Error::Upstream(_)
            | Error::InvalidResource(_) => StatusCode::BAD_GATEWAY,
            Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Configuration(_) | Error::Internal(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Failures confined to a single resource; siblings keep going.
    pub fn is_resource_scoped(&self) -> bool {
        matches!(
            self,
            Error::MissingDependency { .. }
                | Error::ValidationRejected { .. }
                | Error::InvalidResource(_)
        )
    }
}

impl From<relay_client::Error> for Error {
    fn from(e: relay_client::Error) -> Self {
        if e.is_transient() {
            return Error::TransientTransport(e.to_string());
        }
        match e {
            relay_client::Error::Config(msg) => Error::Configuration(msg),
            other => Error::Upstream(other.to_string()),
        }
    }
}

impl From<relay_models::Error> for Error {
    fn from(e: relay_models::Error) -> Self {
        Error::InvalidResource(e.to_string())
    }
}

impl Error {
    /// Message safe to return to callers; internal details are logged instead.
    pub fn public_message(&self) -> String {
        match self {
            Error::Configuration(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
