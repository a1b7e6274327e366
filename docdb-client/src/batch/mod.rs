//! Transactional batch and bulk execution engine.
//!
//! Operations flow through the engine as follows:
//!
//! ```text
//! enqueue -> BatchStreamer -> Batcher -> (full or timer) -> BatchDispatcher
//!         -> (split / throttle retries) -> ResponseAssembler -> completion handles
//! ```
//!
//! A [`TransactionalBatch`] skips the streamer: its operations always form
//! exactly one request against one logical partition.

mod assembler;
mod batcher;
mod builder;
mod executor;
mod operation;
mod packer;
mod response;
mod retry;
mod streamer;

pub use assembler::{AssembledResponse, ResponseAssembler, ResponseRound};
pub use batcher::{BatchExecutor, Batcher, BatcherState, OperationRetrier};
pub use builder::TransactionalBatch;
pub use executor::{BatchDispatcher, BatchRequestOptions, DispatchOutcome, RoutingTarget};
pub use operation::{
    BodySource, ItemOperation, ItemRequestOptions, OperationContext, OperationHandle,
    OperationOutcome, PatchOperation,
};
pub use packer::{fitting_prefix, pack, PackedRequest};
pub use response::{BatchResponse, OperationResult, TypedOperationResult};
pub use retry::{BulkRetryPolicy, RetryAction, ThrottleBackoff};
pub use streamer::{BatchStreamer, StreamerSettings};

pub(crate) use operation::{lock, PatchDocument};
