//! Container entry point for batch and bulk execution.

use std::sync::{Arc, OnceLock};

use docdb_core::{DocumentSerializer, JsonSerializer, PartitionKey};

use crate::batch::{BatchDispatcher, TransactionalBatch};
use crate::bulk::BulkExecutor;
use crate::config::BatchConfig;
use crate::routing::RoutingResolver;
use crate::transport::BatchTransport;

/// A handle to one document container.
///
/// Cloning is cheap; clones share the dispatcher and the bulk executor.
///
/// # Example
///
/// ```ignore
/// let container = Container::new(
///     "orders",
///     transport,
///     resolver,
///     Arc::new(JsonSerializer::new()),
///     BatchConfig::from_env()?,
/// );
/// let response = container
///     .create_transactional_batch("customer-1")
///     .upsert_item(order, None)
///     .execute()
///     .await?;
/// ```
pub struct Container<S: DocumentSerializer = JsonSerializer> {
    name: Arc<str>,
    dispatcher: Arc<BatchDispatcher>,
    serializer: Arc<S>,
    bulk: Arc<OnceLock<BulkExecutor<S>>>,
}

impl<S: DocumentSerializer> Container<S> {
    /// Creates a container bound to `transport` and `resolver`.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn BatchTransport>,
        resolver: Arc<dyn RoutingResolver>,
        serializer: Arc<S>,
        config: BatchConfig,
    ) -> Self {
        let name: String = name.into();
        let dispatcher = Arc::new(BatchDispatcher::new(
            name.clone(),
            transport,
            resolver,
            Arc::new(config),
        ));
        tracing::debug!(container = %name, "Created container");
        Self {
            name: name.into(),
            dispatcher,
            serializer,
            bulk: Arc::new(OnceLock::new()),
        }
    }

    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the batch configuration.
    pub fn config(&self) -> &BatchConfig {
        self.dispatcher.config()
    }

    /// Returns the injected serializer.
    pub fn serializer(&self) -> &Arc<S> {
        &self.serializer
    }

    /// Starts a transactional batch against one logical partition.
    pub fn create_transactional_batch(
        &self,
        partition_key: impl Into<PartitionKey>,
    ) -> TransactionalBatch<S> {
        TransactionalBatch::new(
            partition_key.into(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.serializer),
        )
    }

    /// Returns the container's bulk executor, creating it on first use.
    pub fn bulk(&self) -> &BulkExecutor<S> {
        self.bulk.get_or_init(|| {
            BulkExecutor::new(Arc::clone(&self.dispatcher), Arc::clone(&self.serializer))
        })
    }
}

impl<S: DocumentSerializer> Clone for Container<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            dispatcher: Arc::clone(&self.dispatcher),
            serializer: Arc::clone(&self.serializer),
            bulk: Arc::clone(&self.bulk),
        }
    }
}

impl<S: DocumentSerializer> std::fmt::Debug for Container<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
