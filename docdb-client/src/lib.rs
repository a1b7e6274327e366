//! Async transactional batch and bulk execution for the docdb document database.
//!
//! This crate groups point operations (create, read, replace, upsert, delete,
//! patch) into batch requests. A [`TransactionalBatch`] commits a group of
//! operations against one logical partition atomically; the
//! [`BulkExecutor`] streams independent operations into per-range requests
//! and retries them individually. Both hide partition splits and throttling
//! behind per-operation results.
//!
//! The wire transport and the routing map are injected through the
//! [`BatchTransport`] and [`RoutingResolver`] traits.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docdb_client::{BatchConfig, Container, ItemRequestOptions, JsonSerializer, StaticRangeResolver};
//!
//! let container = Container::new(
//!     "orders",
//!     transport,
//!     Arc::new(StaticRangeResolver::single()),
//!     Arc::new(JsonSerializer::new()),
//!     BatchConfig::default(),
//! );
//!
//! let response = container
//!     .create_transactional_batch("customer-1")
//!     .create_item(order, None)
//!     .replace_item("customer-1", customer, Some(ItemRequestOptions::new().if_match(etag)))
//!     .execute()
//!     .await?;
//!
//! for result in &response {
//!     println!("{} {:?}", result.status_code, result.etag);
//! }
//! ```
//!
//! # Bulk
//!
//! ```rust,ignore
//! let bulk = container.bulk();
//! let mut handles = Vec::new();
//! for order in orders {
//!     handles.push(bulk.upsert_item(order.customer.clone(), order, None, &cancel).await?);
//! }
//! for outcome in bulk.wait_all(handles).await {
//!     let result = outcome?;
//!     assert!(result.is_success());
//! }
//! ```
//!
//! # Configuration
//!
//! [`BatchConfig::builder()`](BatchConfig::builder) builds a validated
//! configuration; [`BatchConfig::from_env()`] applies environment overrides.
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `config-file` | Load [`BatchConfig`] from TOML |

#![warn(missing_docs)]

pub mod batch;
pub mod bulk;
pub mod config;
pub mod config_file;
mod container;
pub mod diagnostics;
pub mod routing;
pub mod transport;

pub use batch::{
    BatchResponse, BatchRequestOptions, BodySource, ItemOperation, ItemRequestOptions,
    OperationHandle, OperationOutcome, OperationResult, PatchOperation, TransactionalBatch,
    TypedOperationResult,
};
pub use bulk::BulkExecutor;
pub use config::{
    max_operations_from_env, BatchConfig, BatchConfigBuilder, ConfigError, ThrottlingRetryConfig,
    ThrottlingRetryConfigBuilder, MAX_BATCH_BODY_BYTES, MAX_OPERATIONS_IN_BATCH,
};
pub use config_file::{FileBatchConfig, FileThrottlingConfig};
pub use container::Container;
pub use diagnostics::{BatchDiagnostics, DispatchRecord, SlowDispatchDetector};
pub use routing::{PartitionKeyRange, PartitionKeyRangeId, RoutingResolver, StaticRangeResolver};
pub use transport::{BatchTransport, ServerBatchRequest, TransportResponse};

pub use docdb_core::protocol::IndexingDirective;
pub use docdb_core::{
    DocDbError, DocumentSerializer, JsonSerializer, PartitionKey, PartitionKeyValue, Result,
    StatusCode, SubStatusCode,
};
pub use tokio_util::sync::CancellationToken;
