//! Error types for docdb operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::status::{StatusCode, SubStatusCode};

/// The main error type for docdb operations.
#[derive(Debug, Error)]
pub enum DocDbError {
    /// Connection-related errors raised by a transport.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or inconsistent wire data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors from the document serializer.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout errors.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Configuration errors (invalid settings, bad environment overrides).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An API was used in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The request was rejected locally before reaching the service.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A single operation or an aggregate request exceeds the body size limit.
    #[error("entity too large: {0}")]
    EntityTooLarge(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The service rejected the request and no per-operation result could be produced.
    #[error("service error {status} (sub-status {sub_status}): {message}")]
    Service {
        /// Status returned by the service.
        status: StatusCode,
        /// Sub-status returned by the service.
        sub_status: SubStatusCode,
        /// Diagnostic message.
        message: String,
        /// Server-provided retry hint.
        retry_after: Option<Duration>,
    },

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DocDbError {
    /// Returns the HTTP-like status this error maps to, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::BadRequest(_) | Self::Configuration(_) => Some(StatusCode::BAD_REQUEST),
            Self::EntityTooLarge(_) => Some(StatusCode::REQUEST_ENTITY_TOO_LARGE),
            Self::Timeout(_) => Some(StatusCode::REQUEST_TIMEOUT),
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the sub-status carried by a service error.
    pub fn sub_status_code(&self) -> SubStatusCode {
        match self {
            Self::Service { sub_status, .. } => *sub_status,
            _ => SubStatusCode::NONE,
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Service {
                status, sub_status, ..
            } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::SERVICE_UNAVAILABLE
                    || crate::status::is_split(*status, *sub_status)
            }
            _ => false,
        }
    }
}

/// A specialized `Result` type for docdb operations.
pub type Result<T> = std::result::Result<T, DocDbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_display() {
        let err = DocDbError::BadRequest("batch must contain at least one operation".to_string());
        assert_eq!(
            err.to_string(),
            "bad request: batch must contain at least one operation"
        );
        assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_entity_too_large_maps_to_413() {
        let err = DocDbError::EntityTooLarge("operation is 3 MiB".to_string());
        assert_eq!(err.status_code(), Some(StatusCode::REQUEST_ENTITY_TOO_LARGE));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_service_error_display() {
        let err = DocDbError::Service {
            status: StatusCode::GONE,
            sub_status: SubStatusCode::PARTITION_KEY_RANGE_GONE,
            message: "split retries exhausted".to_string(),
            retry_after: None,
        };
        assert_eq!(
            err.to_string(),
            "service error 410 Gone (sub-status 1002): split retries exhausted"
        );
        assert_eq!(err.sub_status_code(), SubStatusCode::PARTITION_KEY_RANGE_GONE);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_throttle_is_retryable() {
        let err = DocDbError::Service {
            status: StatusCode::TOO_MANY_REQUESTS,
            sub_status: SubStatusCode::USER_REQUEST_RATE_TOO_LARGE,
            message: String::new(),
            retry_after: Some(Duration::from_millis(10)),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancelled_has_no_status() {
        assert_eq!(DocDbError::Cancelled.status_code(), None);
        assert_eq!(DocDbError::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err: DocDbError = io_err.into();
        assert!(matches!(err, DocDbError::Io(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DocDbError>();
    }
}
