//! Sends packed batches and interprets multi-status responses.

use std::sync::Arc;
use std::time::Instant;

use docdb_core::protocol::{BatchRequestCodec, BatchRequestHeader, BatchResponseCodec};
use docdb_core::{DocDbError, PartitionKey, Result, StatusCode, SubStatusCode};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::assembler::{AssembledResponse, ResponseAssembler, ResponseRound};
use super::operation::ItemOperation;
use super::response::OperationResult;
use super::retry::ThrottleBackoff;
use crate::config::{BatchConfig, MAX_BATCH_BODY_BYTES};
use crate::diagnostics::{DispatchRecord, SlowDispatchDetector};
use crate::routing::{PartitionKeyRangeId, RoutingResolver};
use crate::transport::{BatchTransport, ServerBatchRequest, TransportResponse};

/// Where a batch is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingTarget {
    /// All operations share one logical partition; the range is resolved
    /// from the key and re-resolved after a split.
    PartitionKey(PartitionKey),
    /// A fixed range. Splits are surfaced per operation for the caller to
    /// reroute.
    Range(PartitionKeyRangeId),
}

/// Request-level options of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequestOptions {
    /// Operations commit or roll back together.
    pub is_atomic: bool,
    /// Keep executing after a failed operation; only valid for non-atomic batches.
    pub continue_on_error: bool,
    /// Opaque session token passed to the service.
    pub session_token: Option<String>,
    /// Caller-supplied request properties.
    pub custom_properties: Vec<(String, String)>,
}

impl BatchRequestOptions {
    /// Options for a transactional batch.
    pub fn atomic() -> Self {
        Self {
            is_atomic: true,
            continue_on_error: false,
            session_token: None,
            custom_properties: Vec::new(),
        }
    }

    /// Options for independent bulk operations.
    pub fn bulk() -> Self {
        Self {
            is_atomic: false,
            continue_on_error: true,
            ..Self::atomic()
        }
    }

    /// Sets the session token.
    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Adds a custom request property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_properties.push((key.into(), value.into()));
        self
    }

    /// Rejects contradictory settings.
    pub fn validate(&self) -> Result<()> {
        if self.is_atomic && self.continue_on_error {
            return Err(DocDbError::BadRequest(
                "continue_on_error cannot be set on an atomic batch".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BatchRequestOptions {
    fn default() -> Self {
        Self::atomic()
    }
}

/// Classification of a batch-level response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 2xx, including multi-status; results are positional.
    Success,
    /// The targeted range moved; routing must be refreshed.
    Split,
    /// The service throttled the whole request.
    Throttled {
        /// Service retry hint.
        retry_after: Option<std::time::Duration>,
    },
    /// Any other failure; results are surfaced as is.
    HardFailure,
}

impl DispatchOutcome {
    /// Classifies a batch-level status.
    pub fn classify(
        status: StatusCode,
        sub_status: SubStatusCode,
        retry_after: Option<std::time::Duration>,
    ) -> Self {
        if status.is_success() {
            Self::Success
        } else if docdb_core::status::is_split(status, sub_status) {
            Self::Split
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Self::Throttled { retry_after }
        } else {
            Self::HardFailure
        }
    }
}

/// Executes batches against a transport with split and throttle retries.
pub struct BatchDispatcher {
    container: String,
    transport: Arc<dyn BatchTransport>,
    resolver: Arc<dyn RoutingResolver>,
    config: Arc<BatchConfig>,
    slow_dispatch: SlowDispatchDetector,
}

impl BatchDispatcher {
    /// Creates a dispatcher for `container`.
    pub fn new(
        container: impl Into<String>,
        transport: Arc<dyn BatchTransport>,
        resolver: Arc<dyn RoutingResolver>,
        config: Arc<BatchConfig>,
    ) -> Self {
        let slow_dispatch = SlowDispatchDetector::new(config.slow_dispatch_threshold());
        Self {
            container: container.into(),
            transport,
            resolver,
            config,
            slow_dispatch,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Returns the routing resolver.
    pub fn resolver(&self) -> &Arc<dyn RoutingResolver> {
        &self.resolver
    }

    /// Returns the slow dispatch detector.
    pub fn slow_dispatch(&self) -> &SlowDispatchDetector {
        &self.slow_dispatch
    }

    /// Sends `operations` as one request and returns one result per operation.
    ///
    /// Splits are retried against refreshed routing when the target is a
    /// partition key; batch-level throttles are retried per the throttling
    /// policy. Service rejections are reported in the response; `Err` is
    /// returned only when no response could be obtained.
    #[instrument(skip_all, fields(container = %self.container, operations = operations.len()))]
    pub async fn execute(
        &self,
        operations: &[Arc<ItemOperation>],
        target: &RoutingTarget,
        options: &BatchRequestOptions,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        options.validate()?;

        let records = operations
            .iter()
            .enumerate()
            .map(|(position, op)| op.to_record(position as u32))
            .collect::<Result<Vec<_>>>()?;
        let header = BatchRequestHeader {
            operation_count: records.len() as u32,
            is_atomic: options.is_atomic,
            continue_on_error: options.continue_on_error,
        };
        let body = BatchRequestCodec::encode(header, &records)?;
        if body.len() > MAX_BATCH_BODY_BYTES {
            return Err(DocDbError::EntityTooLarge(format!(
                "request body of {} bytes exceeds the {MAX_BATCH_BODY_BYTES} byte limit",
                body.len()
            )));
        }

        let partition_key = match target {
            RoutingTarget::PartitionKey(pk) => Some(pk.to_json()),
            RoutingTarget::Range(_) => None,
        };
        let indices: Vec<usize> = (0..operations.len()).collect();
        let mut assembler = ResponseAssembler::new(operations.len());
        let mut throttle = ThrottleBackoff::new(self.config.throttling().clone());
        let mut split_retries = 0u32;
        let mut range_id = self.resolve(target, false).await?;

        for round in 0u32.. {
            if cancel.is_cancelled() {
                return Err(DocDbError::Cancelled);
            }

            let request = ServerBatchRequest {
                container: self.container.clone(),
                range_id: range_id.clone(),
                partition_key: partition_key.clone(),
                body: body.clone(),
                operation_count: operations.len(),
                is_atomic: options.is_atomic,
                continue_on_error: options.continue_on_error,
                session_token: options.session_token.clone(),
                custom_properties: options.custom_properties.clone(),
            };

            let started = Instant::now();
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DocDbError::Cancelled),
                response = self.transport.send(request) => response,
            };
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    self.record_call(&mut assembler, &range_id, None, started, round, operations.len());
                    tracing::debug!(range_id = %range_id, error = %e, "Batch transport failed");
                    return Err(e);
                }
            };
            self.record_call(
                &mut assembler,
                &range_id,
                Some(&response),
                started,
                round,
                operations.len(),
            );

            let outcome = DispatchOutcome::classify(
                response.status,
                response.sub_status,
                response.retry_after,
            );
            let response_round = build_round(response, operations.len(), options.is_atomic)?;
            assembler.absorb(response_round, &indices)?;

            match outcome {
                DispatchOutcome::Success | DispatchOutcome::HardFailure => break,
                DispatchOutcome::Split => {
                    let RoutingTarget::PartitionKey(_) = target else {
                        tracing::debug!(range_id = %range_id, "Range split; results returned for rerouting");
                        break;
                    };
                    if split_retries >= self.config.max_split_retries() {
                        tracing::warn!(
                            range_id = %range_id,
                            retries = split_retries,
                            "Split retries exhausted"
                        );
                        break;
                    }
                    split_retries += 1;
                    tracing::info!(
                        range_id = %range_id,
                        attempt = split_retries,
                        "Partition split detected, refreshing routing"
                    );
                    range_id = self.resolve(target, true).await?;
                }
                DispatchOutcome::Throttled { retry_after } => match throttle.next_delay(retry_after) {
                    Some(delay) => {
                        tracing::debug!(
                            range_id = %range_id,
                            attempt = throttle.attempts(),
                            delay_ms = delay.as_millis(),
                            "Batch throttled, backing off"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(DocDbError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        tracing::warn!(
                            range_id = %range_id,
                            attempts = throttle.attempts(),
                            waited_ms = throttle.waited().as_millis(),
                            "Throttle retries exhausted"
                        );
                        break;
                    }
                },
            }
        }

        assembler.finish()
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve(&self, target: &RoutingTarget, force_refresh: bool) -> Result<PartitionKeyRangeId> {
        match target {
            RoutingTarget::PartitionKey(pk) => {
                self.resolver
                    .resolve(&pk.effective_partition_key(), force_refresh)
                    .await
            }
            RoutingTarget::Range(id) => Ok(id.clone()),
        }
    }

    fn record_call(
        &self,
        assembler: &mut ResponseAssembler,
        range_id: &PartitionKeyRangeId,
        response: Option<&TransportResponse>,
        started: Instant,
        round: u32,
        operation_count: usize,
    ) {
        let call = DispatchRecord {
            range_id: range_id.clone(),
            status: response.map(|r| r.status),
            sub_status: response.map_or(SubStatusCode::NONE, |r| r.sub_status),
            request_charge: response.map_or(0.0, |r| r.request_charge),
            latency: started.elapsed(),
            round,
            operation_count,
            activity_id: response.map(|r| r.activity_id),
        };
        self.slow_dispatch.observe(&call);
        assembler.record_call(call);
    }
}

impl std::fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("container", &self.container)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Turns a raw response into a round aligned with the request.
fn build_round(
    response: TransportResponse,
    operation_count: usize,
    is_atomic: bool,
) -> Result<ResponseRound> {
    let mut results: Vec<OperationResult> =
        if response.body.is_empty() && !response.status.is_success() {
            (0..operation_count)
                .map(|_| {
                    let mut result = OperationResult::new(response.status);
                    result.sub_status_code = response.sub_status;
                    result.retry_after = response.retry_after;
                    result
                })
                .collect()
        } else {
            BatchResponseCodec::decode(&response.body)?
                .into_iter()
                .map(OperationResult::from)
                .collect()
        };

    if results.len() != operation_count {
        return Err(DocDbError::Protocol(format!(
            "response holds {} results for {} operations",
            results.len(),
            operation_count
        )));
    }

    let batch_failed =
        !response.status.is_success() || response.status == StatusCode::MULTI_STATUS;
    if is_atomic && batch_failed && results.iter().any(|r| !r.is_success()) {
        let mut marked = 0usize;
        for result in results.iter_mut().filter(|r| r.is_success()) {
            *result = OperationResult::new(StatusCode::FAILED_DEPENDENCY);
            marked += 1;
        }
        if marked > 0 {
            tracing::debug!(
                status = %response.status,
                marked,
                "Marked sibling operations as dependent failures"
            );
        }
    }

    let request_charge = if response.request_charge > 0.0 {
        response.request_charge
    } else {
        results.iter().map(|r| r.request_charge).sum()
    };

    Ok(ResponseRound {
        status_code: response.status,
        sub_status_code: response.sub_status,
        results,
        request_charge,
        retry_after: response.retry_after,
        activity_id: Some(response.activity_id),
        error_message: response.error_message,
    })
}
