//! Transport seam for batch requests.
//!
//! The batch engine produces a fully encoded request body plus routing
//! information and hands it to a [`BatchTransport`]. Connection handling,
//! authentication and the actual wire protocol live behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use docdb_core::{Result, StatusCode, SubStatusCode};
use uuid::Uuid;

use crate::routing::PartitionKeyRangeId;

/// A batch request ready to be sent to the service.
#[derive(Debug, Clone)]
pub struct ServerBatchRequest {
    /// Container the request targets.
    pub container: String,
    /// Partition key range the request is routed to.
    pub range_id: PartitionKeyRangeId,
    /// JSON partition key, set for single-partition transactional batches.
    pub partition_key: Option<String>,
    /// Encoded request body.
    pub body: Bytes,
    /// Number of operations in the body.
    pub operation_count: usize,
    /// Operations commit or roll back together.
    pub is_atomic: bool,
    /// The service keeps executing after a failed operation.
    pub continue_on_error: bool,
    /// Opaque session token passed through to the service.
    pub session_token: Option<String>,
    /// Caller-supplied request properties.
    pub custom_properties: Vec<(String, String)>,
}

/// Raw response to a [`ServerBatchRequest`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Batch-level status.
    pub status: StatusCode,
    /// Batch-level sub-status.
    pub sub_status: SubStatusCode,
    /// Charge for the whole request.
    pub request_charge: f64,
    /// Retry hint for throttled requests.
    pub retry_after: Option<Duration>,
    /// Service-side activity id.
    pub activity_id: Uuid,
    /// Diagnostic message for failed requests.
    pub error_message: Option<String>,
    /// Encoded response body; may be empty for batch-level failures.
    pub body: Bytes,
}

impl TransportResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            sub_status: SubStatusCode::NONE,
            request_charge: 0.0,
            retry_after: None,
            activity_id: Uuid::new_v4(),
            error_message: None,
            body,
        }
    }

    /// Creates a bodiless batch-level failure.
    pub fn failure(status: StatusCode, sub_status: SubStatusCode) -> Self {
        Self {
            sub_status,
            ..Self::new(status, Bytes::new())
        }
    }

    /// Sets the retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Sets the request charge.
    pub fn with_request_charge(mut self, charge: f64) -> Self {
        self.request_charge = charge;
        self
    }

    /// Sets the diagnostic message.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Sends encoded batch requests to the service.
///
/// Implementations return `Ok` for every response the service produced,
/// including non-2xx ones. `Err` is reserved for failures where no response
/// exists (connection loss, timeouts).
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Sends a request and returns the raw response.
    async fn send(&self, request: ServerBatchRequest) -> Result<TransportResponse>;
}
