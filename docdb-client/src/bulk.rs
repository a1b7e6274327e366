//! Bulk execution of independent item operations.
//!
//! Each operation is routed by its own partition key to the streamer of the
//! owning partition key range. Operations headed for the same range are
//! grouped into non-atomic requests; a failure of one does not affect the
//! others. Splits and throttles are retried per operation.
//!
//! # Example
//!
//! ```ignore
//! let bulk = container.bulk();
//! let mut handles = Vec::new();
//! for order in orders {
//!     handles.push(bulk.create_item(order.customer.clone(), order, None, &cancel).await?);
//! }
//! bulk.flush();
//! for handle in handles {
//!     let result = handle.result().await?;
//!     assert!(result.is_success());
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use docdb_core::protocol::{OperationType, BATCH_REQUEST_OVERHEAD_BYTES};
use docdb_core::{DocDbError, DocumentSerializer, JsonSerializer, PartitionKey, Result};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::batch::{
    lock, AssembledResponse, BatchDispatcher, BatchExecutor, BatchRequestOptions, BatchStreamer,
    BodySource, BulkRetryPolicy, ItemOperation, ItemRequestOptions, OperationContext,
    OperationHandle, OperationOutcome, OperationResult, OperationRetrier, PatchDocument, PatchOperation,
    RetryAction, RoutingTarget, StreamerSettings,
};
use crate::routing::PartitionKeyRangeId;

/// Routes independent operations to per-range streamers.
pub struct BulkExecutor<S: DocumentSerializer = JsonSerializer> {
    inner: Arc<BulkInner>,
    serializer: Arc<S>,
}

struct BulkInner {
    dispatcher: Arc<BatchDispatcher>,
    streamers: Mutex<HashMap<PartitionKeyRangeId, Arc<BatchStreamer>>>,
    policy: BulkRetryPolicy,
    next_index: AtomicUsize,
    disposed: CancellationToken,
    retrier: Mutex<Weak<BulkRetrier>>,
}

impl<S: DocumentSerializer> BulkExecutor<S> {
    pub(crate) fn new(dispatcher: Arc<BatchDispatcher>, serializer: Arc<S>) -> Self {
        let config = dispatcher.config();
        let policy = BulkRetryPolicy::new(
            config.bulk_max_operation_retries(),
            config.throttling().clone(),
        );
        Self {
            inner: Arc::new(BulkInner {
                dispatcher,
                streamers: Mutex::new(HashMap::new()),
                policy,
                next_index: AtomicUsize::new(0),
                disposed: CancellationToken::new(),
                retrier: Mutex::new(Weak::new()),
            }),
            serializer,
        }
    }

    /// Enqueues a create of a typed item.
    pub async fn create_item<T>(
        &self,
        partition_key: impl Into<PartitionKey>,
        item: T,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle>
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.submit(OperationType::Create, None, partition_key.into(), Some(body), options, cancel)
            .await
    }

    /// Enqueues a create of serialized bytes.
    pub async fn create_item_stream(
        &self,
        partition_key: impl Into<PartitionKey>,
        body: Bytes,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        self.submit(
            OperationType::Create,
            None,
            partition_key.into(),
            Some(BodySource::Bytes(body)),
            options,
            cancel,
        )
        .await
    }

    /// Enqueues a read.
    pub async fn read_item(
        &self,
        partition_key: impl Into<PartitionKey>,
        id: impl Into<String>,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        self.submit(
            OperationType::Read,
            Some(id.into()),
            partition_key.into(),
            None,
            options,
            cancel,
        )
        .await
    }

    /// Enqueues a replace by a typed item.
    pub async fn replace_item<T>(
        &self,
        partition_key: impl Into<PartitionKey>,
        id: impl Into<String>,
        item: T,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle>
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.submit(
            OperationType::Replace,
            Some(id.into()),
            partition_key.into(),
            Some(body),
            options,
            cancel,
        )
        .await
    }

    /// Enqueues an upsert of a typed item.
    pub async fn upsert_item<T>(
        &self,
        partition_key: impl Into<PartitionKey>,
        item: T,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle>
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.submit(OperationType::Upsert, None, partition_key.into(), Some(body), options, cancel)
            .await
    }

    /// Enqueues an upsert of serialized bytes.
    pub async fn upsert_item_stream(
        &self,
        partition_key: impl Into<PartitionKey>,
        body: Bytes,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        self.submit(
            OperationType::Upsert,
            None,
            partition_key.into(),
            Some(BodySource::Bytes(body)),
            options,
            cancel,
        )
        .await
    }

    /// Enqueues a delete.
    pub async fn delete_item(
        &self,
        partition_key: impl Into<PartitionKey>,
        id: impl Into<String>,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        self.submit(
            OperationType::Delete,
            Some(id.into()),
            partition_key.into(),
            None,
            options,
            cancel,
        )
        .await
    }

    /// Enqueues partial updates.
    pub async fn patch_item(
        &self,
        partition_key: impl Into<PartitionKey>,
        id: impl Into<String>,
        patch: Vec<PatchOperation>,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        let serializer = Arc::clone(&self.serializer);
        let body = BodySource::Deferred(Box::new(move || {
            serializer.to_stream(&PatchDocument {
                operations: &patch,
            })
        }));
        self.submit(
            OperationType::Patch,
            Some(id.into()),
            partition_key.into(),
            Some(body),
            options,
            cancel,
        )
        .await
    }

    /// Decodes the body of a completed operation.
    pub fn deserialize<T: DeserializeOwned>(&self, result: &OperationResult) -> Result<Option<T>> {
        match &result.resource_body {
            Some(body) if !body.is_empty() => self.serializer.from_stream(body.clone()).map(Some),
            _ => Ok(None),
        }
    }

    /// Flushes, then waits for every handle in submission order.
    pub async fn wait_all(&self, handles: Vec<OperationHandle>) -> Vec<OperationOutcome> {
        self.flush();
        join_all(handles.into_iter().map(OperationHandle::result)).await
    }

    /// Dispatches every non-empty batcher now.
    pub fn flush(&self) {
        for streamer in lock(&self.inner.streamers).values() {
            streamer.flush();
        }
    }

    /// Returns the number of ranges with a live streamer.
    pub fn range_count(&self) -> usize {
        lock(&self.inner.streamers).len()
    }

    /// Disposes every streamer; operations not yet dispatched fail.
    pub fn dispose(&self) {
        self.inner.disposed.cancel();
        let streamers: Vec<_> = lock(&self.inner.streamers).drain().collect();
        tracing::debug!(ranges = streamers.len(), "Disposing bulk executor");
        for (_, streamer) in streamers {
            streamer.dispose();
        }
    }

    async fn submit(
        &self,
        operation_type: OperationType,
        id: Option<String>,
        partition_key: PartitionKey,
        body: Option<BodySource>,
        options: Option<ItemRequestOptions>,
        cancel: &CancellationToken,
    ) -> Result<OperationHandle> {
        if self.inner.disposed.is_cancelled() {
            return Err(DocDbError::InvalidState("bulk executor is disposed".to_string()));
        }

        let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed);
        let operation = Arc::new(ItemOperation::new(
            operation_type,
            index,
            id,
            Some(partition_key),
            body,
            options,
        ));
        operation.validate()?;

        let size = operation.encoded_size()?;
        let limit = self.inner.dispatcher.config().max_body_bytes();
        if size + BATCH_REQUEST_OVERHEAD_BYTES > limit {
            return Err(DocDbError::EntityTooLarge(format!(
                "operation of {size} bytes does not fit the {limit} byte request limit"
            )));
        }

        let (context, handle) = OperationContext::new(cancel.clone());
        operation.attach_context(context)?;
        self.inner.enqueue(&self.retrier(), operation, false).await?;
        Ok(handle)
    }

    fn retrier(&self) -> Arc<BulkRetrier> {
        let mut slot = lock(&self.inner.retrier);
        if let Some(retrier) = slot.upgrade() {
            return retrier;
        }
        let retrier = Arc::new(BulkRetrier {
            inner: Arc::downgrade(&self.inner),
        });
        *slot = Arc::downgrade(&retrier);
        retrier
    }

    fn typed_body<T>(&self, item: T) -> BodySource
    where
        T: Serialize + Send + 'static,
    {
        let serializer = Arc::clone(&self.serializer);
        BodySource::Deferred(Box::new(move || serializer.to_stream(&item)))
    }
}

impl<S: DocumentSerializer> std::fmt::Debug for BulkExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkExecutor")
            .field("ranges", &self.range_count())
            .field("disposed", &self.inner.disposed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BulkInner {
    async fn enqueue(
        &self,
        retrier: &Arc<BulkRetrier>,
        operation: Arc<ItemOperation>,
        force_refresh: bool,
    ) -> Result<()> {
        let epk = operation
            .partition_key()
            .map(PartitionKey::effective_partition_key)
            .ok_or_else(|| {
                DocDbError::BadRequest("bulk operations need a partition key".to_string())
            })?;
        let range_id = self
            .dispatcher
            .resolver()
            .resolve(&epk, force_refresh)
            .await?;

        if let Some(context) = operation.context() {
            if let Some(previous) = context.range_id() {
                if force_refresh && previous != range_id {
                    self.retire_range(&previous);
                }
            }
            context.set_range_id(range_id.clone());
        }

        loop {
            let streamer = self.streamer(retrier, &range_id)?;
            match streamer.add(Arc::clone(&operation)) {
                // Retired by a concurrent reroute; pick up a fresh streamer.
                Err(DocDbError::InvalidState(_))
                    if streamer.is_disposed() && !self.disposed.is_cancelled() =>
                {
                    continue
                }
                other => return other,
            }
        }
    }

    fn streamer(
        &self,
        retrier: &Arc<BulkRetrier>,
        range_id: &PartitionKeyRangeId,
    ) -> Result<Arc<BatchStreamer>> {
        let mut streamers = lock(&self.streamers);
        if self.disposed.is_cancelled() {
            return Err(DocDbError::InvalidState("bulk executor is disposed".to_string()));
        }
        if let Some(streamer) = streamers.get(range_id) {
            return Ok(Arc::clone(streamer));
        }

        let config = self.dispatcher.config();
        let settings = StreamerSettings {
            max_operations: config.max_operations(),
            max_bytes: config
                .max_body_bytes()
                .saturating_sub(BATCH_REQUEST_OVERHEAD_BYTES)
                .max(1),
            dispatch_interval: config.dispatch_interval(),
            executor: Arc::new(RangeExecutor {
                dispatcher: Arc::clone(&self.dispatcher),
                range_id: range_id.clone(),
            }),
            retrier: Some(Arc::clone(retrier) as Arc<dyn OperationRetrier>),
        };
        tracing::debug!(range_id = %range_id, "Creating streamer for range");
        let streamer = BatchStreamer::new(settings);
        streamers.insert(range_id.clone(), Arc::clone(&streamer));
        Ok(streamer)
    }

    /// Drops the streamer of a range that routing no longer returns.
    fn retire_range(&self, range_id: &PartitionKeyRangeId) {
        let retired = lock(&self.streamers).remove(range_id);
        if let Some(streamer) = retired {
            tracing::debug!(range_id = %range_id, "Retiring streamer of split range");
            streamer.retire();
        }
    }
}

/// Executes a batcher's operations against one fixed range.
struct RangeExecutor {
    dispatcher: Arc<BatchDispatcher>,
    range_id: PartitionKeyRangeId,
}

#[async_trait]
impl BatchExecutor for RangeExecutor {
    async fn execute_batch(
        &self,
        operations: Vec<Arc<ItemOperation>>,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        let target = RoutingTarget::Range(self.range_id.clone());
        let mut response = self
            .dispatcher
            .execute(&operations, &target, &BatchRequestOptions::bulk(), cancel)
            .await?;
        for result in &mut response.results {
            result.diagnostics = Some(response.diagnostics.clone());
        }
        Ok(response)
    }
}

/// Re-enqueues split or throttled bulk operations.
struct BulkRetrier {
    inner: Weak<BulkInner>,
}

impl OperationRetrier for BulkRetrier {
    fn retry(&self, operation: Arc<ItemOperation>, result: &OperationResult) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let Some(context) = operation.context() else {
            return false;
        };

        let (delay, force_refresh) = match inner.policy.decide(context, result) {
            RetryAction::Complete => return false,
            RetryAction::Reroute => (None, true),
            RetryAction::Backoff(delay) => (Some(delay), false),
        };
        let previous_range = context.range_id();
        tracing::debug!(
            index = operation.index(),
            range_id = previous_range.as_ref().map(PartitionKeyRangeId::as_str),
            status = %result.status_code,
            force_refresh,
            delay_ms = delay.map(|d| d.as_millis() as u64),
            "Retrying bulk operation"
        );

        let Some(retrier) = lock(&inner.retrier).upgrade() else {
            return false;
        };
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = inner.enqueue(&retrier, Arc::clone(&operation), force_refresh).await {
                operation.fail(Arc::new(e));
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use docdb_core::protocol::{BatchRequestCodec, BatchResponseCodec, ResultRecord};
    use docdb_core::{StatusCode, SubStatusCode};

    use super::*;
    use crate::config::BatchConfig;
    use crate::routing::{PartitionKeyRange, StaticRangeResolver};
    use crate::transport::{BatchTransport, ServerBatchRequest, TransportResponse};

    /// Throttles the first `throttle_first` requests, then echoes ids as etags.
    struct FlakyTransport {
        throttle_first: usize,
        gone_ranges: Vec<String>,
        calls: AtomicUsize,
        requests: Mutex<Vec<ServerBatchRequest>>,
    }

    impl FlakyTransport {
        fn new(throttle_first: usize, gone_ranges: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                throttle_first,
                gone_ranges: gone_ranges.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BatchTransport for FlakyTransport {
        async fn send(&self, request: ServerBatchRequest) -> Result<TransportResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let range = request.range_id.as_str().to_string();
            let (header, operations) = BatchRequestCodec::decode(&request.body)?;
            assert!(!header.is_atomic);
            assert!(header.continue_on_error);
            lock(&self.requests).push(request);

            if self.gone_ranges.contains(&range) {
                return Ok(TransportResponse::failure(
                    StatusCode::GONE,
                    SubStatusCode::PARTITION_KEY_RANGE_GONE,
                ));
            }
            if call < self.throttle_first {
                let results: Vec<_> = operations
                    .iter()
                    .map(|_| {
                        let mut r = ResultRecord::new(StatusCode::TOO_MANY_REQUESTS);
                        r.retry_after = Some(Duration::from_millis(1));
                        r
                    })
                    .collect();
                return Ok(TransportResponse::new(
                    StatusCode::MULTI_STATUS,
                    BatchResponseCodec::encode(&results)?,
                ));
            }
            let results: Vec<_> = operations
                .iter()
                .map(|op| {
                    let mut r = ResultRecord::new(StatusCode::CREATED);
                    r.etag = op.id.clone().or_else(|| {
                        op.resource_body
                            .as_ref()
                            .map(|b| String::from_utf8_lossy(b).into_owned())
                    });
                    r
                })
                .collect();
            Ok(TransportResponse::new(
                StatusCode::OK,
                BatchResponseCodec::encode(&results)?,
            ))
        }
    }

    fn bulk(
        transport: Arc<FlakyTransport>,
        resolver: Arc<StaticRangeResolver>,
    ) -> BulkExecutor {
        let config = BatchConfig::builder()
            .dispatch_interval(Duration::from_millis(5))
            .throttling(|t| t.max_attempts(0).jitter(0.0))
            .build()
            .unwrap();
        let dispatcher = Arc::new(BatchDispatcher::new(
            "orders",
            transport,
            resolver,
            Arc::new(config),
        ));
        BulkExecutor::new(dispatcher, Arc::new(JsonSerializer::new()))
    }

    #[tokio::test]
    async fn test_operations_route_to_range_streamers() {
        let transport = FlakyTransport::new(0, &[]);
        let bulk = bulk(transport.clone(), Arc::new(StaticRangeResolver::uniform(4)));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..40 {
            let handle = bulk
                .read_item(format!("pk-{i}"), format!("id-{i}"), None, &cancel)
                .await
                .unwrap();
            handles.push(handle);
        }
        let outcomes = bulk.wait_all(handles).await;

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let result = outcome.unwrap();
            assert_eq!(result.etag, Some(format!("id-{i}")));
            assert!(result.diagnostics.is_some());
        }
        assert!(bulk.range_count() > 1 && bulk.range_count() <= 4);
        bulk.dispose();
    }

    #[tokio::test]
    async fn test_throttled_operations_are_retried() {
        let transport = FlakyTransport::new(1, &[]);
        let bulk = bulk(transport.clone(), Arc::new(StaticRangeResolver::single()));
        let cancel = CancellationToken::new();

        let handle = bulk
            .create_item_stream("pk", Bytes::from_static(br#"{"id":"a"}"#), None, &cancel)
            .await
            .unwrap();
        let result = handle.result().await.unwrap();
        assert_eq!(result.status_code, StatusCode::CREATED);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_split_reroutes_to_new_range() {
        let transport = FlakyTransport::new(0, &["0"]);
        let resolver = Arc::new(StaticRangeResolver::single());
        resolver
            .replace_ranges(vec![
                PartitionKeyRange::new("1", 0, u32::MAX / 2),
                PartitionKeyRange::new("2", u32::MAX / 2 + 1, u32::MAX),
            ])
            .await;
        let bulk = bulk(transport.clone(), resolver.clone());
        let cancel = CancellationToken::new();

        let handle = bulk.delete_item("pk", "gone-1", None, &cancel).await.unwrap();
        let result = handle.result().await.unwrap();
        assert_eq!(result.status_code, StatusCode::CREATED);
        assert_eq!(resolver.refresh_count(), 1);

        let ranges: Vec<_> = lock(&transport.requests)
            .iter()
            .map(|r| r.range_id.as_str().to_string())
            .collect();
        assert_eq!(ranges[0], "0");
        assert_ne!(ranges[1], "0");
        // The streamer of the split range is gone; only the new range remains.
        assert_eq!(bulk.range_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_operation_rejected_at_add() {
        let transport = FlakyTransport::new(0, &[]);
        let bulk = bulk(transport.clone(), Arc::new(StaticRangeResolver::single()));
        let body = Bytes::from(vec![b'x'; BatchConfig::default().max_body_bytes()]);

        let err = bulk
            .upsert_item_stream("pk", body, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::EntityTooLarge(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_rejects_new_operations() {
        let bulk = bulk(FlakyTransport::new(0, &[]), Arc::new(StaticRangeResolver::single()));
        bulk.dispose();
        let err = bulk
            .read_item("pk", "a", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_no_streamer_created_after_dispose() {
        let bulk = bulk(FlakyTransport::new(0, &[]), Arc::new(StaticRangeResolver::single()));
        let retrier = bulk.retrier();
        bulk.inner.streamer(&retrier, &PartitionKeyRangeId::new("0")).unwrap();
        assert_eq!(bulk.range_count(), 1);

        bulk.dispose();
        let err = bulk
            .inner
            .streamer(&retrier, &PartitionKeyRangeId::new("1"))
            .unwrap_err();
        assert!(matches!(err, DocDbError::InvalidState(_)));
        assert_eq!(bulk.range_count(), 0);
    }

    #[tokio::test]
    async fn test_deserialize_result_body() {
        let bulk = bulk(FlakyTransport::new(0, &[]), Arc::new(StaticRangeResolver::single()));
        let mut result = OperationResult::new(StatusCode::OK);
        assert_eq!(bulk.deserialize::<serde_json::Value>(&result).unwrap(), None);
        result.resource_body = Some(Bytes::from_static(br#"{"id":"a"}"#));
        let value: serde_json::Value = bulk.deserialize(&result).unwrap().unwrap();
        assert_eq!(value["id"], "a");
    }
}
