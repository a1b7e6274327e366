//! Batch responses and per-operation results.

use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use docdb_core::protocol::ResultRecord;
use docdb_core::{DocumentSerializer, JsonSerializer, Result, StatusCode, SubStatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::assembler::AssembledResponse;
use crate::diagnostics::BatchDiagnostics;

/// Result of one operation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Status of the operation.
    pub status_code: StatusCode,
    /// Sub-status of the operation.
    pub sub_status_code: SubStatusCode,
    /// Etag of the item after the operation.
    pub etag: Option<String>,
    /// Raw item body returned by the service.
    pub resource_body: Option<Bytes>,
    /// Charge attributed to the operation.
    pub request_charge: f64,
    /// Retry hint for throttled operations.
    pub retry_after: Option<Duration>,
    /// Physical calls made for this operation; populated in bulk mode.
    pub diagnostics: Option<BatchDiagnostics>,
}

impl OperationResult {
    /// Creates a result with the given status.
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            sub_status_code: SubStatusCode::NONE,
            etag: None,
            resource_body: None,
            request_charge: 0.0,
            retry_after: None,
            diagnostics: None,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Returns true if retrying the operation may succeed (throttle or split).
    pub fn is_retryable(&self) -> bool {
        self.status_code == StatusCode::TOO_MANY_REQUESTS
            || docdb_core::status::is_split(self.status_code, self.sub_status_code)
    }
}

impl From<ResultRecord> for OperationResult {
    fn from(record: ResultRecord) -> Self {
        Self {
            status_code: record.status_code,
            sub_status_code: record.sub_status_code,
            etag: record.etag,
            resource_body: record.resource_body,
            request_charge: record.request_charge,
            retry_after: record.retry_after,
            diagnostics: None,
        }
    }
}

/// An operation result with its body decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOperationResult<T> {
    /// Status of the operation.
    pub status_code: StatusCode,
    /// Sub-status of the operation.
    pub sub_status_code: SubStatusCode,
    /// Etag of the item after the operation.
    pub etag: Option<String>,
    /// Decoded item, if the service returned one.
    pub resource: Option<T>,
    /// Charge attributed to the operation.
    pub request_charge: f64,
    /// Retry hint for throttled operations.
    pub retry_after: Option<Duration>,
}

/// Response of a transactional batch.
///
/// Results are aligned with the order operations were added to the batch.
#[derive(Debug, Clone)]
pub struct BatchResponse<S = JsonSerializer> {
    inner: AssembledResponse,
    serializer: Arc<S>,
}

impl<S: DocumentSerializer> BatchResponse<S> {
    pub(crate) fn new(inner: AssembledResponse, serializer: Arc<S>) -> Self {
        Self { inner, serializer }
    }

    /// Returns the batch-level status.
    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code
    }

    /// Returns the batch-level sub-status.
    pub fn sub_status_code(&self) -> SubStatusCode {
        self.inner.sub_status_code
    }

    /// Returns true if the batch committed.
    pub fn is_success(&self) -> bool {
        self.inner.status_code.is_success()
            && self.inner.results.iter().all(OperationResult::is_success)
    }

    /// Returns the charge summed over every physical call.
    pub fn request_charge(&self) -> f64 {
        self.inner.request_charge
    }

    /// Returns the retry hint of the final call.
    pub fn retry_after(&self) -> Option<Duration> {
        self.inner.retry_after
    }

    /// Returns the activity id of the final call.
    pub fn activity_id(&self) -> Option<Uuid> {
        self.inner.activity_id
    }

    /// Returns the service's diagnostic message, if the batch failed.
    pub fn error_message(&self) -> Option<&str> {
        self.inner.error_message.as_deref()
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.inner.results.len()
    }

    /// Returns true if the batch had no operations.
    pub fn is_empty(&self) -> bool {
        self.inner.results.is_empty()
    }

    /// Iterates over results in operation order.
    pub fn iter(&self) -> std::slice::Iter<'_, OperationResult> {
        self.inner.results.iter()
    }

    /// Returns the result at `index`.
    pub fn get(&self, index: usize) -> Option<&OperationResult> {
        self.inner.results.get(index)
    }

    /// Returns the result at `index` with its body decoded as `T`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an out-of-range index and `Serialization`
    /// if the body cannot be decoded.
    pub fn get_operation_result_at_index<T: DeserializeOwned>(
        &self,
        index: usize,
    ) -> Result<TypedOperationResult<T>> {
        let result = self.inner.results.get(index).ok_or_else(|| {
            docdb_core::DocDbError::BadRequest(format!(
                "index {index} is out of range for a batch of {}",
                self.len()
            ))
        })?;

        let resource = match &result.resource_body {
            Some(body) if !body.is_empty() => Some(self.serializer.from_stream(body.clone())?),
            _ => None,
        };

        Ok(TypedOperationResult {
            status_code: result.status_code,
            sub_status_code: result.sub_status_code,
            etag: result.etag.clone(),
            resource,
            request_charge: result.request_charge,
            retry_after: result.retry_after,
        })
    }

    /// Returns the physical calls made for this batch.
    pub fn diagnostics(&self) -> &BatchDiagnostics {
        &self.inner.diagnostics
    }
}

impl<S> Index<usize> for BatchResponse<S> {
    type Output = OperationResult;

    fn index(&self, index: usize) -> &Self::Output {
        &self.inner.results[index]
    }
}

impl<'a, S: DocumentSerializer> IntoIterator for &'a BatchResponse<S> {
    type Item = &'a OperationResult;
    type IntoIter = std::slice::Iter<'a, OperationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: String,
    }

    fn response(results: Vec<OperationResult>, status: StatusCode) -> BatchResponse {
        let inner = AssembledResponse {
            status_code: status,
            sub_status_code: SubStatusCode::NONE,
            results,
            request_charge: 3.0,
            retry_after: None,
            activity_id: None,
            error_message: None,
            diagnostics: BatchDiagnostics::new(),
        };
        BatchResponse::new(inner, Arc::new(JsonSerializer::new()))
    }

    #[test]
    fn test_typed_accessor_decodes_body() {
        let mut created = OperationResult::new(StatusCode::CREATED);
        created.resource_body = Some(Bytes::from_static(br#"{"id":"a"}"#));
        created.etag = Some("\"1\"".to_string());
        let response = response(vec![created, OperationResult::new(StatusCode::NO_CONTENT)], StatusCode::OK);

        let typed = response.get_operation_result_at_index::<Item>(0).unwrap();
        assert_eq!(typed.resource, Some(Item { id: "a".into() }));
        assert_eq!(typed.etag.as_deref(), Some("\"1\""));

        let empty = response.get_operation_result_at_index::<Item>(1).unwrap();
        assert_eq!(empty.resource, None);
        assert!(response.get_operation_result_at_index::<Item>(2).is_err());
    }

    #[test]
    fn test_indexer_and_iteration() {
        let response = response(
            vec![
                OperationResult::new(StatusCode::CREATED),
                OperationResult::new(StatusCode::OK),
            ],
            StatusCode::OK,
        );
        assert_eq!(response.len(), 2);
        assert_eq!(response[1].status_code, StatusCode::OK);
        assert_eq!(response.iter().count(), 2);
        assert!(response.is_success());
        assert_eq!(response.request_charge(), 3.0);
    }

    #[test]
    fn test_failed_result_makes_batch_unsuccessful() {
        let response = response(
            vec![
                OperationResult::new(StatusCode::FAILED_DEPENDENCY),
                OperationResult::new(StatusCode::CONFLICT),
            ],
            StatusCode::CONFLICT,
        );
        assert!(!response.is_success());
    }

    #[test]
    fn test_retryable_results() {
        let mut gone = OperationResult::new(StatusCode::GONE);
        gone.sub_status_code = SubStatusCode::COMPLETING_SPLIT;
        assert!(gone.is_retryable());
        assert!(OperationResult::new(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!OperationResult::new(StatusCode::GONE).is_retryable());
        assert!(!OperationResult::new(StatusCode::CONFLICT).is_retryable());
    }
}
