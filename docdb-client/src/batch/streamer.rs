//! Rotating batcher per routing scope.
//!
//! The streamer keeps exactly one open [`Batcher`]. When it fills up, a fresh
//! batcher is swapped in under a short lock and the retired one is handed to
//! a dispatch task over a channel. A timer flushes a non-empty batcher once it
//! is older than the dispatch interval.
//!
//! A batcher handed to the dispatch task always runs to completion; only the
//! tokens of its own operations can cut it short.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use docdb_core::{DocDbError, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::batcher::{BatchExecutor, Batcher, OperationRetrier};
use super::operation::{lock, ItemOperation};

/// Settings shared by every batcher a streamer creates.
#[derive(Clone)]
pub struct StreamerSettings {
    /// Max operations per batcher.
    pub max_operations: usize,
    /// Operation byte budget per batcher.
    pub max_bytes: usize,
    /// Age after which a non-empty batcher is flushed.
    pub dispatch_interval: Duration,
    /// Executor used by every batcher.
    pub executor: Arc<dyn BatchExecutor>,
    /// Optional retry delegate.
    pub retrier: Option<Arc<dyn OperationRetrier>>,
}

impl std::fmt::Debug for StreamerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerSettings")
            .field("max_operations", &self.max_operations)
            .field("max_bytes", &self.max_bytes)
            .field("dispatch_interval", &self.dispatch_interval)
            .finish_non_exhaustive()
    }
}

/// Owns the current batcher of one routing scope.
#[derive(Debug)]
pub struct BatchStreamer {
    settings: StreamerSettings,
    current: Mutex<Arc<Batcher>>,
    dispatch_tx: mpsc::UnboundedSender<Arc<Batcher>>,
    shutdown: CancellationToken,
}

impl BatchStreamer {
    /// Creates a streamer and starts its dispatch and timer tasks.
    ///
    /// Must be called from within a tokio runtime. The timer stops on
    /// disposal; the dispatch task drains handed-off batchers and stops once
    /// the streamer is dropped.
    pub fn new(settings: StreamerSettings) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let streamer = Arc::new(Self {
            current: Mutex::new(Arc::new(new_batcher(&settings))),
            settings,
            dispatch_tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_dispatch_loop(dispatch_rx));
        tokio::spawn(run_timer_loop(
            Arc::downgrade(&streamer),
            streamer.settings.dispatch_interval,
            shutdown,
        ));
        streamer
    }

    /// Enqueues `operation`, rotating the current batcher when it is full.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after disposal and `Cancelled` if the
    /// operation's token already fired.
    pub fn add(&self, operation: Arc<ItemOperation>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DocDbError::InvalidState("streamer is disposed".to_string()));
        }
        if operation
            .context()
            .map_or(false, |ctx| ctx.cancellation().is_cancelled())
        {
            return Err(DocDbError::Cancelled);
        }

        loop {
            let batcher = Arc::clone(&*lock(&self.current));
            if batcher.try_add(Arc::clone(&operation))? {
                if self.shutdown.is_cancelled() {
                    // Raced a retire; nothing else will flush this batcher.
                    self.flush();
                }
                return Ok(());
            }
            self.rotate_if_current(&batcher);
        }
    }

    /// Dispatches the current batcher now if it holds anything.
    pub fn flush(&self) {
        let batcher = Arc::clone(&*lock(&self.current));
        if !batcher.is_empty() {
            self.rotate_if_current(&batcher);
        }
    }

    /// Returns the number of operations waiting in the current batcher.
    pub fn pending(&self) -> usize {
        lock(&self.current).len()
    }

    /// Stops the timer and fails operations still in the open batcher.
    ///
    /// Batchers already handed to the dispatch task keep running and resolve
    /// their operations with the service's results.
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let batcher = Arc::clone(&*lock(&self.current));
        batcher.dispose();
        tracing::debug!("Batch streamer disposed");
    }

    /// Stops accepting operations and dispatches whatever is pending.
    ///
    /// Used when the routing scope of the streamer no longer exists.
    pub fn retire(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.flush();
        tracing::debug!("Batch streamer retired");
    }

    /// Returns true once disposed or retired.
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn rotate_if_current(&self, full: &Arc<Batcher>) {
        let retired = {
            let mut current = lock(&self.current);
            if !Arc::ptr_eq(&current, full) {
                // Another caller already rotated.
                return;
            }
            std::mem::replace(&mut *current, Arc::new(new_batcher(&self.settings)))
        };

        tracing::debug!(operations = retired.len(), "Rotated batcher");
        if let Err(mpsc::error::SendError(retired)) = self.dispatch_tx.send(retired) {
            retired.dispose();
        }
    }

    fn flush_if_aged(&self) {
        let batcher = Arc::clone(&*lock(&self.current));
        if !batcher.is_empty() && batcher.age() >= self.settings.dispatch_interval {
            tracing::trace!(operations = batcher.len(), "Timer flushing batcher");
            self.rotate_if_current(&batcher);
        }
    }
}

impl Drop for BatchStreamer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn new_batcher(settings: &StreamerSettings) -> Batcher {
    let batcher = Batcher::new(
        settings.max_operations,
        settings.max_bytes,
        Arc::clone(&settings.executor),
    );
    match &settings.retrier {
        Some(retrier) => batcher.with_retrier(Arc::clone(retrier)),
        None => batcher,
    }
}

async fn run_dispatch_loop(mut receiver: mpsc::UnboundedReceiver<Arc<Batcher>>) {
    while let Some(batcher) = receiver.recv().await {
        tokio::spawn(async move {
            if let Err(e) = batcher.dispatch(&CancellationToken::new()).await {
                tracing::warn!(error = %e, "Batcher dispatch rejected");
            }
        });
    }
}

async fn run_timer_loop(
    streamer: Weak<BatchStreamer>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(streamer) = streamer.upgrade() else { break };
                streamer.flush_if_aged();
            }
        }
    }
}
