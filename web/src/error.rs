//! The single HTTP-facing error type.
//!
//! Built the same way the teacher's `AppError` is — `status`, `message`,
//! `code`, optional `source: anyhow::Error` — with `From` impls bridging
//! each store/backbone/envelope error into the right status per the
//! taxonomy: validation -> 400, auth -> 401, transient store/backbone -> 5xx.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clawderpunk_core::backbone::BackboneError;
use clawderpunk_core::envelope::EnvelopeError;
use clawderpunk_core::event_log::EventLogError;
use clawderpunk_core::memory::MemoryEntryError;
use clawderpunk_core::memory_store::MemoryStoreError;
use clawderpunk_projection::{ContextPackError, WorkerError};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    #[allow(dead_code)]
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach a source error for internal logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// `400` validation error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// `401` authentication error. Message is always the generic constant
    /// per §7 ("generic message").
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "authentication required".to_string(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// `503` transient unavailability.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }

    /// `500` internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(status = %self.status, code = %self.code, error = %source, "internal server error");
            } else {
                tracing::error!(status = %self.status, code = %self.code, message = %self.message, "internal server error");
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("an internal error occurred").with_source(err)
    }
}

impl From<EnvelopeError> for AppError {
    fn from(err: EnvelopeError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<MemoryEntryError> for AppError {
    fn from(err: MemoryEntryError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<EventLogError> for AppError {
    fn from(err: EventLogError) -> Self {
        match err {
            EventLogError::InvalidRequest(message) => Self::bad_request(message),
            EventLogError::Storage(message) => {
                Self::unavailable("storage is temporarily unavailable").with_source(anyhow::anyhow!(message))
            }
        }
    }
}

impl From<MemoryStoreError> for AppError {
    fn from(err: MemoryStoreError) -> Self {
        let MemoryStoreError::Storage(message) = err;
        Self::unavailable("storage is temporarily unavailable").with_source(anyhow::anyhow!(message))
    }
}

impl From<BackboneError> for AppError {
    fn from(err: BackboneError) -> Self {
        Self::unavailable("backbone is temporarily unavailable").with_source(anyhow::anyhow!(err.to_string()))
    }
}

impl From<ContextPackError> for AppError {
    fn from(err: ContextPackError) -> Self {
        match err {
            ContextPackError::MemoryStore(e) => e.into(),
            ContextPackError::EventLog(e) => e.into(),
        }
    }
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        Self::internal("replay failed").with_source(anyhow::anyhow!(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("invalid shape");
        assert_eq!(err.to_string(), "[BAD_REQUEST] invalid shape");
    }

    #[test]
    fn test_unauthorized_is_generic() {
        let err = AppError::unauthorized();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "authentication required");
    }

    #[test]
    fn invalid_request_maps_to_bad_request() {
        let err: AppError = EventLogError::InvalidRequest("limit too big".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_error_maps_to_unavailable() {
        let err: AppError = EventLogError::Storage("connection reset".to_string()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
