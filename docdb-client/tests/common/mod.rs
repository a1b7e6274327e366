//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use docdb_client::{
    BatchConfig, BatchTransport, Container, DocDbError, JsonSerializer, Result,
    ServerBatchRequest, StaticRangeResolver, StatusCode, TransportResponse,
};
use docdb_core::protocol::{
    BatchRequestCodec, BatchResponseCodec, OperationRecord, OperationType, ResultRecord,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer: String,
    pub total: u32,
}

pub fn order(id: &str, customer: &str, total: u32) -> Order {
    Order {
        id: id.to_string(),
        customer: customer.to_string(),
        total,
    }
}

/// One scripted reaction of the [`FakeTransport`].
pub enum Scripted {
    /// Returns the response as is.
    Respond(TransportResponse),
    /// Fails the call without a response.
    Fail(DocDbError),
    /// Echoes, then overrides the results at the given positions and uses
    /// `batch_status` as the overall status.
    FailPositions {
        batch_status: StatusCode,
        failures: Vec<(usize, StatusCode)>,
    },
}

/// In-memory service: consumes scripted reactions first, then echoes.
///
/// The echo answers every operation with a type-appropriate success status,
/// an etag equal to the item id and the request body as resource body.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ServerBatchRequest>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency: Some(latency),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ServerBatchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn decoded_requests(&self) -> Vec<Vec<OperationRecord>> {
        self.requests()
            .iter()
            .map(|r| BatchRequestCodec::decode(&r.body).unwrap().1)
            .collect()
    }
}

pub fn echo_status(operation_type: OperationType) -> StatusCode {
    match operation_type {
        OperationType::Create => StatusCode::CREATED,
        OperationType::Delete => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}

pub fn echo_result(operation: &OperationRecord) -> ResultRecord {
    let mut result = ResultRecord::new(echo_status(operation.operation_type));
    result.etag = operation.id.clone().or_else(|| {
        operation
            .resource_body
            .as_ref()
            .and_then(|body| serde_json::from_slice::<serde_json::Value>(body).ok())
            .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(str::to_string))
    });
    result.resource_body = operation.resource_body.clone();
    result.request_charge = 1.0;
    result
}

#[async_trait]
impl BatchTransport for FakeTransport {
    async fn send(&self, request: ServerBatchRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let (_, operations) = BatchRequestCodec::decode(&request.body)?;
        let mut results: Vec<ResultRecord> = operations.iter().map(echo_result).collect();

        let scripted = self.script.lock().unwrap().pop_front();
        let status = match scripted {
            Some(Scripted::Respond(response)) => return Ok(response),
            Some(Scripted::Fail(error)) => return Err(error),
            Some(Scripted::FailPositions {
                batch_status,
                failures,
            }) => {
                for (position, status) in failures {
                    results[position] = ResultRecord::new(status);
                }
                batch_status
            }
            None => StatusCode::OK,
        };

        Ok(TransportResponse::new(status, BatchResponseCodec::encode(&results)?))
    }
}

pub fn encode_results(results: &[ResultRecord]) -> Bytes {
    BatchResponseCodec::encode(results).unwrap()
}

pub fn test_config() -> BatchConfig {
    BatchConfig::builder()
        .dispatch_interval(Duration::from_millis(10))
        .throttling(|t| {
            t.initial_backoff(Duration::from_millis(1))
                .max_backoff(Duration::from_millis(5))
                .jitter(0.0)
        })
        .build()
        .unwrap()
}

pub fn container(transport: Arc<FakeTransport>) -> Container {
    container_with(transport, Arc::new(StaticRangeResolver::single()), test_config())
}

pub fn container_with(
    transport: Arc<FakeTransport>,
    resolver: Arc<StaticRangeResolver>,
    config: BatchConfig,
) -> Container {
    Container::new(
        "orders",
        transport,
        resolver,
        Arc::new(JsonSerializer::new()),
        config,
    )
}
