//! Error kinds shared across components and their HTTP mapping.
//!
//! Components return these typed errors upward; the control API maps kind to
//! status code and a sanitized envelope. Internal detail is logged, never
//! surfaced.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fatal to the caller, never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Policy(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint style conflicts, caller-visible.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stale read detected by a compare-and-swap transition.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Transient backend trouble, retried with backoff before surfacing.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("operation canceled")]
    Canceled,

    #[error("timed out: {0}")]
    Timeout(String),

    /// Programming error, surfaced as an opaque 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Short stable code carried in every error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation",
            Error::Auth(_) => "Auth",
            Error::Policy(_) => "Policy",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::PreconditionFailed(_) => "PreconditionFailed",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::Canceled => "Canceled",
            Error::Timeout(_) => "Timeout",
            Error::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Policy(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::PreconditionFailed(_) => StatusCode::CONFLICT,
            Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Canceled | Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the caller.
    fn public_message(&self) -> String {
        match self {
            // Full detail stays in the logs for these two.
            Error::Internal(_) => "internal error".to_string(),
            Error::BackendUnavailable(_) => "backend temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Error::Internal(_) | Error::BackendUnavailable(_)) {
            tracing::error!(code = self.code(), "request failed: {:?}", self);
        } else {
            tracing::debug!(code = self.code(), "request failed: {}", self);
        }
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Success envelope: `{"success": true, "data": ...}`.
pub fn ok<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            Error::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::Auth("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Policy("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::BackendUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = Error::Internal(anyhow::anyhow!("connection string postgres://secret"));
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.code(), "Internal");
    }
}
