//! Point operations and their completion plumbing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use docdb_core::protocol::{IndexingDirective, OperationRecord, OperationType};
use docdb_core::{DocDbError, PartitionKey, Result};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::response::OperationResult;
use crate::routing::PartitionKeyRangeId;

/// Terminal outcome of one operation.
///
/// Failures are shared so that one executor error fanned out to many
/// operations is observed as the same instance by every handle.
pub type OperationOutcome = std::result::Result<OperationResult, Arc<DocDbError>>;

/// Per-operation request options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRequestOptions {
    /// Only apply the operation if the item's etag matches.
    pub if_match_etag: Option<String>,
    /// Only apply the operation if the item's etag does not match.
    pub if_none_match_etag: Option<String>,
    /// Override of the container's indexing policy.
    pub indexing_directive: Option<IndexingDirective>,
    /// Time-to-live override in seconds; `-1` disables expiry.
    pub time_to_live_seconds: Option<i32>,
    /// Opaque caller properties; never sent on the wire.
    pub properties: BTreeMap<String, String>,
}

impl ItemRequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the if-match etag.
    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match_etag = Some(etag.into());
        self
    }

    /// Sets the if-none-match etag.
    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match_etag = Some(etag.into());
        self
    }

    /// Sets the indexing directive.
    pub fn indexing_directive(mut self, directive: IndexingDirective) -> Self {
        self.indexing_directive = Some(directive);
        self
    }

    /// Sets the time-to-live override.
    pub fn time_to_live(mut self, seconds: i32) -> Self {
        self.time_to_live_seconds = Some(seconds);
        self
    }

    /// Adds a custom property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Checks the options for contradictions.
    pub fn validate(&self) -> Result<()> {
        if self.if_match_etag.is_some() && self.if_none_match_etag.is_some() {
            return Err(DocDbError::BadRequest(
                "if-match and if-none-match cannot both be set".to_string(),
            ));
        }
        if let Some(ttl) = self.time_to_live_seconds {
            if ttl == 0 || ttl < -1 {
                return Err(DocDbError::BadRequest(format!(
                    "time to live must be positive or -1, got {ttl}"
                )));
            }
        }
        Ok(())
    }
}

/// One partial update applied by a patch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Adds a value at `path`.
    Add {
        /// JSON pointer.
        path: String,
        /// Value to add.
        value: serde_json::Value,
    },
    /// Removes the value at `path`.
    Remove {
        /// JSON pointer.
        path: String,
    },
    /// Replaces an existing value at `path`.
    Replace {
        /// JSON pointer.
        path: String,
        /// Replacement value.
        value: serde_json::Value,
    },
    /// Sets `path`, creating it if missing.
    Set {
        /// JSON pointer.
        path: String,
        /// Value to set.
        value: serde_json::Value,
    },
    /// Adds a number to the value at `path`.
    #[serde(rename = "incr")]
    Increment {
        /// JSON pointer.
        path: String,
        /// Amount to add.
        value: f64,
    },
}

#[derive(Serialize)]
pub(crate) struct PatchDocument<'a> {
    pub(crate) operations: &'a [PatchOperation],
}

/// Source of an operation body before materialization.
pub enum BodySource {
    /// Caller-supplied bytes.
    Bytes(Bytes),
    /// A typed value serialized on first use.
    Deferred(Box<dyn FnOnce() -> Result<Bytes> + Send>),
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Completion and retry state bound to an operation once it is enqueued.
#[derive(Debug)]
pub struct OperationContext {
    sender: Mutex<Option<oneshot::Sender<OperationOutcome>>>,
    range_id: Mutex<Option<PartitionKeyRangeId>>,
    cancel: CancellationToken,
    split_retries: AtomicU32,
    throttle_retries: AtomicU32,
}

impl OperationContext {
    /// Creates a context and the handle its completion resolves.
    pub fn new(cancel: CancellationToken) -> (Self, OperationHandle) {
        let (sender, receiver) = oneshot::channel();
        let context = Self {
            sender: Mutex::new(Some(sender)),
            range_id: Mutex::new(None),
            cancel,
            split_retries: AtomicU32::new(0),
            throttle_retries: AtomicU32::new(0),
        };
        (context, OperationHandle { receiver })
    }

    /// Resolves the operation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the operation was already completed.
    pub fn complete(&self, outcome: OperationOutcome) -> Result<()> {
        let sender = lock(&self.sender).take().ok_or_else(|| {
            DocDbError::InvalidState("operation already completed".to_string())
        })?;
        // The caller may have dropped its handle; the outcome is discarded then.
        let _ = sender.send(outcome);
        Ok(())
    }

    /// Returns true once the operation has been resolved.
    pub fn is_completed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Returns the token cancelling this operation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the range the operation was last routed to.
    pub fn range_id(&self) -> Option<PartitionKeyRangeId> {
        lock(&self.range_id).clone()
    }

    /// Records the range the operation is routed to.
    pub fn set_range_id(&self, range_id: PartitionKeyRangeId) {
        *lock(&self.range_id) = Some(range_id);
    }

    /// Bumps the split retry counter, returning the new value.
    pub fn next_split_retry(&self) -> u32 {
        self.split_retries.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Bumps the throttle retry counter, returning the new value.
    pub fn next_throttle_retry(&self) -> u32 {
        self.throttle_retries.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.split_retries.load(Ordering::Relaxed) + self.throttle_retries.load(Ordering::Relaxed)
    }
}

/// Awaitable completion of one operation.
#[derive(Debug)]
pub struct OperationHandle {
    receiver: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    /// Waits for the operation to complete.
    pub async fn result(self) -> OperationOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            Err(Arc::new(DocDbError::InvalidState(
                "operation was dropped without completion".to_string(),
            )))
        })
    }
}

/// Immutable description of one point operation.
///
/// The body is materialized at most once and cached; retries reuse the
/// cached bytes.
pub struct ItemOperation {
    operation_type: OperationType,
    index: usize,
    id: Option<String>,
    partition_key: Option<PartitionKey>,
    options: Option<ItemRequestOptions>,
    source: Mutex<Option<BodySource>>,
    body: OnceLock<std::result::Result<Option<Bytes>, String>>,
    encoded_len: OnceLock<usize>,
    context: OnceLock<OperationContext>,
}

impl ItemOperation {
    /// Creates an operation.
    pub fn new(
        operation_type: OperationType,
        index: usize,
        id: Option<String>,
        partition_key: Option<PartitionKey>,
        body: Option<BodySource>,
        options: Option<ItemRequestOptions>,
    ) -> Self {
        Self {
            operation_type,
            index,
            id,
            partition_key,
            options,
            source: Mutex::new(body),
            body: OnceLock::new(),
            encoded_len: OnceLock::new(),
            context: OnceLock::new(),
        }
    }

    /// Returns the operation type.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Returns the original index of the operation.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the item id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the partition key carried by the operation itself.
    pub fn partition_key(&self) -> Option<&PartitionKey> {
        self.partition_key.as_ref()
    }

    /// Returns the request options.
    pub fn options(&self) -> Option<&ItemRequestOptions> {
        self.options.as_ref()
    }

    /// Serializes the body if that has not happened yet.
    pub fn materialize(&self) -> Result<()> {
        self.materialized_body().map(|_| ())
    }

    /// Returns the materialized body, materializing it first if needed.
    pub fn materialized_body(&self) -> Result<Option<Bytes>> {
        if let Some(cached) = self.body.get() {
            return cached.clone().map_err(DocDbError::Serialization);
        }

        let mut source = lock(&self.source);
        if let Some(cached) = self.body.get() {
            return cached.clone().map_err(DocDbError::Serialization);
        }

        let computed = match source.take() {
            None => Ok(None),
            Some(BodySource::Bytes(bytes)) => Ok(Some(bytes)),
            Some(BodySource::Deferred(serialize)) => match serialize() {
                Ok(bytes) => Ok(Some(bytes)),
                Err(DocDbError::Serialization(message)) => Err(message),
                Err(other) => Err(other.to_string()),
            },
        };
        let _ = self.body.set(computed.clone());
        computed.map_err(DocDbError::Serialization)
    }

    /// Returns the exact wire size of this operation.
    pub fn encoded_size(&self) -> Result<usize> {
        if let Some(len) = self.encoded_len.get() {
            return Ok(*len);
        }
        let len = self.to_record(0)?.encoded_len();
        Ok(*self.encoded_len.get_or_init(|| len))
    }

    /// Builds the wire record; `position` is the slot inside the physical request.
    pub fn to_record(&self, position: u32) -> Result<OperationRecord> {
        let mut record = OperationRecord::new(position, self.operation_type);
        record.id = self.id.clone();
        record.resource_body = self.materialized_body()?;
        if let Some(pk) = &self.partition_key {
            record.partition_key = Some(pk.to_json());
            record.effective_partition_key = Some(pk.effective_partition_key().to_hex());
        }
        if let Some(options) = &self.options {
            record.if_match = options.if_match_etag.clone();
            record.if_none_match = options.if_none_match_etag.clone();
            record.indexing_directive = options.indexing_directive;
            record.time_to_live_seconds = options.time_to_live_seconds;
        }
        Ok(record)
    }

    /// Checks the operation shape and options.
    pub fn validate(&self) -> Result<()> {
        if self.operation_type.requires_id() && self.id.as_deref().map_or(true, str::is_empty) {
            return Err(DocDbError::BadRequest(format!(
                "{} operation at index {} requires an id",
                self.operation_type, self.index
            )));
        }
        if let Some(options) = &self.options {
            options.validate()?;
        }
        Ok(())
    }

    /// Binds the completion context.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState("context already attached")` on a second call.
    pub fn attach_context(&self, context: OperationContext) -> Result<()> {
        self.context
            .set(context)
            .map_err(|_| DocDbError::InvalidState("context already attached".to_string()))
    }

    /// Returns the attached context.
    pub fn context(&self) -> Option<&OperationContext> {
        self.context.get()
    }

    /// Resolves the operation through its context.
    pub fn complete(&self, outcome: OperationOutcome) -> Result<()> {
        self.context
            .get()
            .ok_or_else(|| DocDbError::InvalidState("no context attached".to_string()))?
            .complete(outcome)
    }

    /// Returns true once the operation has been resolved.
    pub fn is_completed(&self) -> bool {
        self.context.get().map_or(false, OperationContext::is_completed)
    }

    /// Fails the operation with a shared error.
    pub(crate) fn fail(&self, error: Arc<DocDbError>) {
        if let Err(e) = self.complete(Err(error)) {
            tracing::debug!(index = self.index, error = %e, "Ignoring failure for resolved operation");
        }
    }
}

impl fmt::Debug for ItemOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemOperation")
            .field("operation_type", &self.operation_type)
            .field("index", &self.index)
            .field("id", &self.id)
            .field("partition_key", &self.partition_key)
            .finish_non_exhaustive()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use docdb_core::StatusCode;

    use super::*;

    fn counting_body(counter: Arc<AtomicUsize>) -> BodySource {
        BodySource::Deferred(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(br#"{"id":"a"}"#))
        }))
    }

    #[test]
    fn test_materialize_runs_serializer_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let op = ItemOperation::new(
            OperationType::Create,
            0,
            None,
            None,
            Some(counting_body(counter.clone())),
            None,
        );
        let first = op.materialized_body().unwrap();
        let second = op.materialized_body().unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_materialization_is_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let op = ItemOperation::new(
            OperationType::Upsert,
            0,
            None,
            None,
            Some(BodySource::Deferred(Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(DocDbError::Serialization("boom".to_string()))
            }))),
            None,
        );
        assert!(matches!(op.materialize(), Err(DocDbError::Serialization(ref m)) if m == "boom"));
        assert!(matches!(op.materialize(), Err(DocDbError::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bodiless_operation() {
        let op = ItemOperation::new(OperationType::Read, 0, Some("a".into()), None, None, None);
        assert_eq!(op.materialized_body().unwrap(), None);
        assert!(op.encoded_size().unwrap() > 0);
    }

    #[test]
    fn test_attach_context_twice_fails() {
        let op = ItemOperation::new(OperationType::Read, 0, Some("a".into()), None, None, None);
        let (first, _h1) = OperationContext::new(CancellationToken::new());
        let (second, _h2) = OperationContext::new(CancellationToken::new());
        op.attach_context(first).unwrap();
        let err = op.attach_context(second).unwrap_err();
        assert!(matches!(err, DocDbError::InvalidState(ref m) if m == "context already attached"));
    }

    #[tokio::test]
    async fn test_second_completion_is_rejected() {
        let (context, handle) = OperationContext::new(CancellationToken::new());
        context
            .complete(Ok(OperationResult::new(StatusCode::OK)))
            .unwrap();
        assert!(context.is_completed());
        assert!(context
            .complete(Ok(OperationResult::new(StatusCode::CONFLICT)))
            .is_err());
        assert_eq!(handle.result().await.unwrap().status_code, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dropped_context_fails_handle() {
        let (context, handle) = OperationContext::new(CancellationToken::new());
        drop(context);
        assert!(matches!(
            handle.result().await.unwrap_err().as_ref(),
            DocDbError::InvalidState(_)
        ));
    }

    #[test]
    fn test_record_carries_options() {
        let options = ItemRequestOptions::new()
            .if_match("\"e1\"")
            .indexing_directive(IndexingDirective::Exclude)
            .time_to_live(30);
        let op = ItemOperation::new(
            OperationType::Replace,
            4,
            Some("a".into()),
            Some(PartitionKey::new("pk")),
            Some(BodySource::Bytes(Bytes::from_static(b"{}"))),
            Some(options),
        );
        let record = op.to_record(1).unwrap();
        assert_eq!(record.index, 1);
        assert_eq!(record.if_match.as_deref(), Some("\"e1\""));
        assert_eq!(record.time_to_live_seconds, Some(30));
        assert_eq!(record.partition_key.as_deref(), Some(r#"["pk"]"#));
        assert_eq!(op.encoded_size().unwrap(), record.encoded_len());
    }

    #[test]
    fn test_validation() {
        let missing_id = ItemOperation::new(OperationType::Delete, 0, None, None, None, None);
        assert!(matches!(missing_id.validate(), Err(DocDbError::BadRequest(_))));

        let conflicting = ItemRequestOptions::new().if_match("a").if_none_match("b");
        assert!(conflicting.validate().is_err());
        assert!(ItemRequestOptions::new().time_to_live(0).validate().is_err());
        assert!(ItemRequestOptions::new().time_to_live(-1).validate().is_ok());
    }

    #[test]
    fn test_patch_serialization() {
        let ops = vec![
            PatchOperation::Set {
                path: "/name".into(),
                value: serde_json::json!("x"),
            },
            PatchOperation::Increment {
                path: "/count".into(),
                value: 1.0,
            },
        ];
        let json = serde_json::to_string(&PatchDocument { operations: &ops }).unwrap();
        assert_eq!(
            json,
            r#"{"operations":[{"op":"set","path":"/name","value":"x"},{"op":"incr","path":"/count","value":1.0}]}"#
        );
    }
}
