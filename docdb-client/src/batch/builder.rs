//! Fluent builder for transactional batches.

use std::sync::Arc;

use bytes::Bytes;
use docdb_core::protocol::{OperationType, BATCH_REQUEST_OVERHEAD_BYTES};
use docdb_core::{DocDbError, DocumentSerializer, JsonSerializer, PartitionKey, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::executor::{BatchDispatcher, BatchRequestOptions, RoutingTarget};
use super::operation::{BodySource, ItemOperation, ItemRequestOptions, PatchDocument, PatchOperation};
use super::response::BatchResponse;

/// Operations against one logical partition that commit or fail together.
///
/// # Example
///
/// ```ignore
/// let response = container
///     .create_transactional_batch("customer-1")
///     .create_item(order, None)
///     .replace_item("customer-1", customer, Some(ItemRequestOptions::new().if_match(etag)))
///     .delete_item("cart-1", None)
///     .execute()
///     .await?;
///
/// if response.is_success() {
///     let created = response.get_operation_result_at_index::<Order>(0)?;
/// }
/// ```
pub struct TransactionalBatch<S: DocumentSerializer = JsonSerializer> {
    partition_key: PartitionKey,
    dispatcher: Arc<BatchDispatcher>,
    serializer: Arc<S>,
    operations: Vec<Arc<ItemOperation>>,
}

impl<S: DocumentSerializer> TransactionalBatch<S> {
    pub(crate) fn new(
        partition_key: PartitionKey,
        dispatcher: Arc<BatchDispatcher>,
        serializer: Arc<S>,
    ) -> Self {
        Self {
            partition_key,
            dispatcher,
            serializer,
            operations: Vec::new(),
        }
    }

    /// Returns the partition key shared by every operation.
    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// Returns the number of operations added.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if no operation was added.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Adds a create of a typed item.
    pub fn create_item<T>(self, item: T, options: Option<ItemRequestOptions>) -> Self
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.push(OperationType::Create, None, Some(body), options)
    }

    /// Adds a create of an already serialized item.
    pub fn create_item_stream(self, body: Bytes, options: Option<ItemRequestOptions>) -> Self {
        self.push(OperationType::Create, None, Some(BodySource::Bytes(body)), options)
    }

    /// Adds a read of the item with `id`.
    pub fn read_item(self, id: impl Into<String>, options: Option<ItemRequestOptions>) -> Self {
        self.push(OperationType::Read, Some(id.into()), None, options)
    }

    /// Adds a replace of the item with `id` by a typed item.
    pub fn replace_item<T>(
        self,
        id: impl Into<String>,
        item: T,
        options: Option<ItemRequestOptions>,
    ) -> Self
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.push(OperationType::Replace, Some(id.into()), Some(body), options)
    }

    /// Adds a replace of the item with `id` by serialized bytes.
    pub fn replace_item_stream(
        self,
        id: impl Into<String>,
        body: Bytes,
        options: Option<ItemRequestOptions>,
    ) -> Self {
        self.push(
            OperationType::Replace,
            Some(id.into()),
            Some(BodySource::Bytes(body)),
            options,
        )
    }

    /// Adds an upsert of a typed item.
    pub fn upsert_item<T>(self, item: T, options: Option<ItemRequestOptions>) -> Self
    where
        T: Serialize + Send + 'static,
    {
        let body = self.typed_body(item);
        self.push(OperationType::Upsert, None, Some(body), options)
    }

    /// Adds an upsert of serialized bytes.
    pub fn upsert_item_stream(self, body: Bytes, options: Option<ItemRequestOptions>) -> Self {
        self.push(OperationType::Upsert, None, Some(BodySource::Bytes(body)), options)
    }

    /// Adds a delete of the item with `id`.
    pub fn delete_item(self, id: impl Into<String>, options: Option<ItemRequestOptions>) -> Self {
        self.push(OperationType::Delete, Some(id.into()), None, options)
    }

    /// Adds partial updates to the item with `id`.
    pub fn patch_item(
        self,
        id: impl Into<String>,
        patch: Vec<PatchOperation>,
        options: Option<ItemRequestOptions>,
    ) -> Self {
        let serializer = Arc::clone(&self.serializer);
        let body = BodySource::Deferred(Box::new(move || {
            serializer.to_stream(&PatchDocument {
                operations: &patch,
            })
        }));
        self.push(OperationType::Patch, Some(id.into()), Some(body), options)
    }

    /// Executes the batch with default options.
    pub async fn execute(self) -> Result<BatchResponse<S>> {
        self.execute_with_options(BatchRequestOptions::atomic(), &CancellationToken::new())
            .await
    }

    /// Executes the batch.
    ///
    /// # Errors
    ///
    /// Local validation fails without a network call: `BadRequest` for an
    /// empty batch, invalid options or a malformed operation;
    /// `EntityTooLarge` when the operation count or body size exceeds the
    /// configured limits; `Serialization` when an item cannot be
    /// serialized. Service rejections are reported through the response.
    pub async fn execute_with_options(
        self,
        options: BatchRequestOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchResponse<S>> {
        if self.operations.is_empty() {
            return Err(DocDbError::BadRequest(
                "a transactional batch needs at least one operation".to_string(),
            ));
        }
        if !options.is_atomic {
            return Err(DocDbError::BadRequest(
                "transactional batches are always atomic".to_string(),
            ));
        }
        options.validate()?;

        let config = self.dispatcher.config();
        if self.operations.len() > config.max_operations() {
            return Err(DocDbError::EntityTooLarge(format!(
                "batch holds {} operations, the limit is {}",
                self.operations.len(),
                config.max_operations()
            )));
        }

        let mut body_bytes = BATCH_REQUEST_OVERHEAD_BYTES;
        for op in &self.operations {
            op.validate()?;
            body_bytes += op.encoded_size()?;
        }
        if body_bytes > config.max_body_bytes() {
            return Err(DocDbError::EntityTooLarge(format!(
                "batch body of {body_bytes} bytes exceeds the {} byte limit",
                config.max_body_bytes()
            )));
        }

        tracing::debug!(
            partition_key = %self.partition_key,
            operations = self.operations.len(),
            bytes = body_bytes,
            "Executing transactional batch"
        );
        let target = RoutingTarget::PartitionKey(self.partition_key.clone());
        let response = self
            .dispatcher
            .execute(&self.operations, &target, &options, cancel)
            .await?;
        Ok(BatchResponse::new(response, self.serializer))
    }

    fn typed_body<T>(&self, item: T) -> BodySource
    where
        T: Serialize + Send + 'static,
    {
        let serializer = Arc::clone(&self.serializer);
        BodySource::Deferred(Box::new(move || serializer.to_stream(&item)))
    }

    fn push(
        mut self,
        operation_type: OperationType,
        id: Option<String>,
        body: Option<BodySource>,
        options: Option<ItemRequestOptions>,
    ) -> Self {
        let index = self.operations.len();
        self.operations.push(Arc::new(ItemOperation::new(
            operation_type,
            index,
            id,
            None,
            body,
            options,
        )));
        self
    }
}

impl<S: DocumentSerializer> std::fmt::Debug for TransactionalBatch<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalBatch")
            .field("partition_key", &self.partition_key)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use docdb_core::protocol::{BatchRequestCodec, BatchResponseCodec, ResultRecord};
    use docdb_core::StatusCode;
    use serde::Deserialize;

    use super::*;
    use crate::config::BatchConfig;
    use crate::routing::StaticRangeResolver;
    use crate::transport::{BatchTransport, ServerBatchRequest, TransportResponse};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: String,
        total: u32,
    }

    /// Answers every operation with its index as etag and echoes bodies back.
    #[derive(Default)]
    struct EchoTransport {
        requests: Mutex<Vec<ServerBatchRequest>>,
    }

    #[async_trait]
    impl BatchTransport for EchoTransport {
        async fn send(&self, request: ServerBatchRequest) -> Result<TransportResponse> {
            let (_, operations) = BatchRequestCodec::decode(&request.body)?;
            let results: Vec<_> = operations
                .iter()
                .map(|op| {
                    let mut result = ResultRecord::new(StatusCode::OK);
                    result.etag = Some(op.index.to_string());
                    result.resource_body = op.resource_body.clone();
                    result.request_charge = 1.0;
                    result
                })
                .collect();
            self.requests.lock().unwrap().push(request);
            Ok(TransportResponse::new(
                StatusCode::OK,
                BatchResponseCodec::encode(&results)?,
            ))
        }
    }

    fn batch(config: BatchConfig) -> (TransactionalBatch, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport::default());
        let dispatcher = Arc::new(BatchDispatcher::new(
            "orders",
            transport.clone(),
            Arc::new(StaticRangeResolver::single()),
            Arc::new(config),
        ));
        (
            TransactionalBatch::new(
                PartitionKey::new("customer-1"),
                dispatcher,
                Arc::new(JsonSerializer::new()),
            ),
            transport,
        )
    }

    fn order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            total: 10,
        }
    }

    #[tokio::test]
    async fn test_execute_returns_ordered_typed_results() {
        let (batch, transport) = batch(BatchConfig::default());
        let response = batch
            .create_item(order("a"), None)
            .upsert_item(order("b"), None)
            .read_item("c", None)
            .delete_item("d", None)
            .execute()
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.len(), 4);
        for (i, result) in response.iter().enumerate() {
            assert_eq!(result.etag, Some(i.to_string()));
        }
        let typed = response.get_operation_result_at_index::<Order>(1).unwrap();
        assert_eq!(typed.resource, Some(order("b")));
        assert_eq!(response.request_charge(), 4.0);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_bad_request() {
        let (batch, transport) = batch(BatchConfig::default());
        let err = batch.execute().await.unwrap_err();
        assert!(matches!(err, DocDbError::BadRequest(_)));
        assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_many_operations_rejected_locally() {
        let config = BatchConfig::builder().max_operations(2).build().unwrap();
        let (batch, transport) = batch(config);
        let err = batch
            .read_item("a", None)
            .read_item("b", None)
            .read_item("c", None)
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::REQUEST_ENTITY_TOO_LARGE));
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_locally() {
        let config = BatchConfig::builder().max_body_bytes(128).build().unwrap();
        let (batch, _) = batch(config);
        let err = batch
            .create_item_stream(Bytes::from(vec![b'x'; 200]), None)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::EntityTooLarge(_)));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_locally() {
        let (batch, _) = batch(BatchConfig::default());
        let options = ItemRequestOptions::new().if_match("a").if_none_match("b");
        let err = batch.delete_item("a", Some(options)).execute().await.unwrap_err();
        assert!(matches!(err, DocDbError::BadRequest(_)));

        let (batch, _) = batch_default();
        let err = batch
            .read_item("a", None)
            .execute_with_options(BatchRequestOptions::bulk(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocDbError::BadRequest(_)));
    }

    fn batch_default() -> (TransactionalBatch, Arc<EchoTransport>) {
        batch(BatchConfig::default())
    }

    #[tokio::test]
    async fn test_patch_body_is_serialized() {
        let (batch, transport) = batch_default();
        batch
            .patch_item(
                "a",
                vec![PatchOperation::Remove {
                    path: "/legacy".into(),
                }],
                None,
            )
            .execute()
            .await
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        let (_, operations) = BatchRequestCodec::decode(&requests[0].body).unwrap();
        assert_eq!(operations[0].operation_type, OperationType::Patch);
        assert_eq!(
            operations[0].resource_body.as_deref(),
            Some(&br#"{"operations":[{"op":"remove","path":"/legacy"}]}"#[..])
        );
    }
}
