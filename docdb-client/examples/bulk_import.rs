//! Imports a set of orders through the bulk executor, then commits a
//! transactional batch, against an in-memory service.
//!
//! Run with `RUST_LOG=docdb_client=debug cargo run --example bulk_import`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docdb_client::{
    BatchConfig, BatchTransport, CancellationToken, Container, ItemRequestOptions, JsonSerializer,
    Result, ServerBatchRequest, StaticRangeResolver, StatusCode, SubStatusCode, TransportResponse,
};
use docdb_core::protocol::{BatchRequestCodec, BatchResponseCodec, ResultRecord};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    id: String,
    customer: String,
    total: u32,
}

/// Accepts everything, throttling every seventh request once.
struct InMemoryService {
    requests: AtomicUsize,
}

#[async_trait]
impl BatchTransport for InMemoryService {
    async fn send(&self, request: ServerBatchRequest) -> Result<TransportResponse> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        if n % 7 == 6 {
            return Ok(TransportResponse::failure(
                StatusCode::TOO_MANY_REQUESTS,
                SubStatusCode::NONE,
            )
            .with_retry_after(Duration::from_millis(20)));
        }

        let (_, operations) = BatchRequestCodec::decode(&request.body)?;
        let results: Vec<_> = operations
            .iter()
            .map(|op| {
                let mut result = ResultRecord::new(StatusCode::CREATED);
                result.etag = Some(format!("\"{n:04x}-{}\"", op.index));
                result.resource_body = op.resource_body.clone();
                result.request_charge = 6.2;
                result
            })
            .collect();
        Ok(TransportResponse::new(
            StatusCode::OK,
            BatchResponseCodec::encode(&results)?,
        ))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = BatchConfig::builder()
        .dispatch_interval(Duration::from_millis(50))
        .build()?;
    let container = Container::new(
        "orders",
        Arc::new(InMemoryService {
            requests: AtomicUsize::new(0),
        }),
        Arc::new(StaticRangeResolver::uniform(4)),
        Arc::new(JsonSerializer::new()),
        config,
    );

    let bulk = container.bulk();
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();
    for i in 0..500u32 {
        let order = Order {
            id: format!("order-{i}"),
            customer: format!("customer-{}", i % 40),
            total: i * 3,
        };
        let customer = order.customer.clone();
        handles.push(bulk.create_item(customer, order, None, &cancel).await?);
    }

    let mut charge = 0.0;
    let mut failed = 0usize;
    for outcome in bulk.wait_all(handles).await {
        match outcome {
            Ok(result) if result.is_success() => charge += result.request_charge,
            _ => failed += 1,
        }
    }
    println!(
        "bulk import: {} ranges, {failed} failed, {charge:.1} RU",
        bulk.range_count()
    );
    bulk.dispose();

    let response = container
        .create_transactional_batch("customer-1")
        .upsert_item(
            Order {
                id: "order-1".to_string(),
                customer: "customer-1".to_string(),
                total: 99,
            },
            None,
        )
        .read_item("order-41", Some(ItemRequestOptions::new()))
        .execute()
        .await?;

    println!(
        "transactional batch: {} ({} calls)",
        response.status_code(),
        response.diagnostics().call_count()
    );
    if let Ok(first) = response.get_operation_result_at_index::<Order>(0) {
        println!("upserted {:?} etag {:?}", first.resource, first.etag);
    }

    Ok(())
}
