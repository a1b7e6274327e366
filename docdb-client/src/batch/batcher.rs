//! Fixed-capacity accumulator for one physical request.

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docdb_core::protocol::BATCH_REQUEST_OVERHEAD_BYTES;
use docdb_core::{DocDbError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::assembler::AssembledResponse;
use super::operation::{lock, ItemOperation};
use super::packer::pack;
use super::response::OperationResult;

/// Executes the operations of one batcher.
///
/// The returned response must hold one result per operation, in order.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Executes `operations` as one logical batch.
    async fn execute_batch(
        &self,
        operations: Vec<Arc<ItemOperation>>,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse>;
}

/// Takes over retryable operations after a dispatch.
pub trait OperationRetrier: Send + Sync {
    /// Returns true if the retrier took ownership of `operation`.
    ///
    /// When false, the operation is completed with `result`.
    fn retry(&self, operation: Arc<ItemOperation>, result: &OperationResult) -> bool;
}

/// Lifecycle of a [`Batcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Accepting operations.
    Open,
    /// Dispatch started; no further operations accepted.
    Dispatching,
    /// Pending operations were failed; terminal.
    Disposed,
}

struct Inner {
    state: BatcherState,
    operations: Vec<Arc<ItemOperation>>,
    bytes: usize,
}

/// Accumulates operations for exactly one physical request.
///
/// Accept decisions are made under a lock so concurrent callers never
/// overflow the count or byte budget. The byte budget counts operation
/// bytes only; the fixed request overhead is added when packing.
pub struct Batcher {
    max_operations: usize,
    max_bytes: usize,
    inner: Mutex<Inner>,
    created: Instant,
    executor: Arc<dyn BatchExecutor>,
    retrier: Option<Arc<dyn OperationRetrier>>,
}

impl Batcher {
    /// Creates an open batcher.
    pub fn new(max_operations: usize, max_bytes: usize, executor: Arc<dyn BatchExecutor>) -> Self {
        Self {
            max_operations,
            max_bytes,
            inner: Mutex::new(Inner {
                state: BatcherState::Open,
                operations: Vec::new(),
                bytes: 0,
            }),
            created: Instant::now(),
            executor,
            retrier: None,
        }
    }

    /// Routes retryable results to `retrier` instead of completing them.
    pub fn with_retrier(mut self, retrier: Arc<dyn OperationRetrier>) -> Self {
        self.retrier = Some(retrier);
        self
    }

    /// Attempts to append `operation`.
    ///
    /// Returns `Ok(false)` when either budget would overflow or dispatch has
    /// started. The first operation is accepted regardless of its size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the batcher was disposed, or the
    /// materialization error of the operation body.
    pub fn try_add(&self, operation: Arc<ItemOperation>) -> Result<bool> {
        let size = operation.encoded_size()?;

        let mut inner = lock(&self.inner);
        match inner.state {
            BatcherState::Disposed => Err(DocDbError::InvalidState(
                "cannot add to a disposed batcher".to_string(),
            )),
            BatcherState::Dispatching => Ok(false),
            BatcherState::Open => {
                if inner.operations.len() >= self.max_operations {
                    return Ok(false);
                }
                if !inner.operations.is_empty() && inner.bytes + size > self.max_bytes {
                    return Ok(false);
                }
                inner.operations.push(operation);
                inner.bytes += size;
                Ok(true)
            }
        }
    }

    /// Returns true if no operation was accepted.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).operations.is_empty()
    }

    /// Returns the number of accepted operations.
    pub fn len(&self) -> usize {
        lock(&self.inner).operations.len()
    }

    /// Returns the accumulated operation bytes.
    pub fn size_bytes(&self) -> usize {
        lock(&self.inner).bytes
    }

    /// Returns the current state.
    pub fn state(&self) -> BatcherState {
        lock(&self.inner).state
    }

    /// Returns the time since the batcher was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Sends the accepted operations and resolves every one of them.
    ///
    /// Operations cancelled before dispatch fail with `Cancelled`. An executor
    /// error fails every carried operation with that same error instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if dispatch already started or the batcher was
    /// disposed. Per-operation failures are delivered through the handles.
    pub async fn dispatch(&self, cancel: &CancellationToken) -> Result<()> {
        let operations = {
            let mut inner = lock(&self.inner);
            if inner.state != BatcherState::Open {
                return Err(DocDbError::InvalidState(format!(
                    "batcher cannot dispatch in state {:?}",
                    inner.state
                )));
            }
            inner.state = BatcherState::Dispatching;
            std::mem::take(&mut inner.operations)
        };

        let mut pending = Vec::with_capacity(operations.len());
        for op in operations {
            let cancelled = op
                .context()
                .map_or(false, |ctx| ctx.cancellation().is_cancelled());
            if cancelled {
                op.fail(Arc::new(DocDbError::Cancelled));
            } else {
                pending.push(op);
            }
        }

        while !pending.is_empty() {
            let packed = match pack(
                pending.clone(),
                self.max_bytes + BATCH_REQUEST_OVERHEAD_BYTES,
                self.max_operations,
            ) {
                Ok(packed) => packed,
                Err(e) => {
                    tracing::warn!(operations = pending.len(), error = %e, "Failed to pack batcher operations");
                    fail_all(&pending, e);
                    return Ok(());
                }
            };
            pending = packed.remaining;

            tracing::debug!(
                operations = packed.included.len(),
                bytes = packed.body_bytes,
                deferred = pending.len(),
                "Dispatching batcher"
            );
            self.dispatch_slice(packed.included, cancel).await;
        }
        Ok(())
    }

    async fn dispatch_slice(&self, slice: Vec<Arc<ItemOperation>>, cancel: &CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DocDbError::Cancelled),
            response = self.executor.execute_batch(slice.clone(), cancel) => response,
            never = fail_cancelled_in_flight(&slice) => match never {},
        };

        let response = match outcome {
            Ok(response) if response.results.len() == slice.len() => response,
            Ok(response) => {
                fail_all(
                    &slice,
                    DocDbError::Protocol(format!(
                        "executor returned {} results for {} operations",
                        response.results.len(),
                        slice.len()
                    )),
                );
                return;
            }
            Err(e) => {
                tracing::debug!(operations = slice.len(), error = %e, "Batch execution failed");
                fail_all(&slice, e);
                return;
            }
        };

        for (op, result) in slice.into_iter().zip(response.results) {
            if op.is_completed() {
                tracing::trace!(index = op.index(), "Dropping result of cancelled operation");
                continue;
            }
            if result.is_retryable() {
                if let Some(retrier) = &self.retrier {
                    if retrier.retry(Arc::clone(&op), &result) {
                        continue;
                    }
                }
            }
            if let Err(e) = op.complete(Ok(result)) {
                tracing::debug!(index = op.index(), error = %e, "Operation already resolved");
            }
        }
    }

    /// Fails every pending operation and refuses further use.
    pub fn dispose(&self) {
        let operations = {
            let mut inner = lock(&self.inner);
            inner.state = BatcherState::Disposed;
            std::mem::take(&mut inner.operations)
        };
        if !operations.is_empty() {
            fail_all(
                &operations,
                DocDbError::InvalidState("batcher disposed before dispatch".to_string()),
            );
        }
    }
}

/// Fails each in-flight operation as soon as its own token fires.
///
/// Pends forever once every token has been observed; callers race it
/// against the execution.
async fn fail_cancelled_in_flight(slice: &[Arc<ItemOperation>]) -> Infallible {
    let mut waits: FuturesUnordered<_> = slice
        .iter()
        .filter_map(|op| {
            let token = op.context()?.cancellation().clone();
            Some(async move {
                token.cancelled().await;
                op
            })
        })
        .collect();
    while let Some(op) = waits.next().await {
        tracing::debug!(index = op.index(), "Operation cancelled while in flight");
        op.fail(Arc::new(DocDbError::Cancelled));
    }
    std::future::pending().await
}

fn fail_all(operations: &[Arc<ItemOperation>], error: DocDbError) {
    let shared = Arc::new(error);
    for op in operations {
        op.fail(Arc::clone(&shared));
    }
}

impl fmt::Debug for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Batcher")
            .field("max_operations", &self.max_operations)
            .field("max_bytes", &self.max_bytes)
            .field("state", &inner.state)
            .field("operations", &inner.operations.len())
            .field("bytes", &inner.bytes)
            .finish()
    }
}
