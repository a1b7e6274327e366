//! Per-call diagnostics for batch dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use docdb_core::{StatusCode, SubStatusCode};
use uuid::Uuid;

use crate::routing::PartitionKeyRangeId;

/// Statistics of one physical request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    /// Range the request was routed to.
    pub range_id: PartitionKeyRangeId,
    /// Batch-level status, or `None` when the transport failed.
    pub status: Option<StatusCode>,
    /// Batch-level sub-status.
    pub sub_status: SubStatusCode,
    /// Charge reported for the call.
    pub request_charge: f64,
    /// Wall time of the call.
    pub latency: Duration,
    /// Zero for the first attempt, incremented on every re-issue.
    pub round: u32,
    /// Operations carried by the call.
    pub operation_count: usize,
    /// Service activity id, if a response was received.
    pub activity_id: Option<Uuid>,
}

/// Diagnostics accumulated across every physical call made for one logical batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDiagnostics {
    calls: Vec<DispatchRecord>,
}

impl BatchDiagnostics {
    /// Creates empty diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the record of one physical call.
    pub fn record(&mut self, call: DispatchRecord) {
        self.calls.push(call);
    }

    /// Appends every call recorded in `other`.
    pub fn merge(&mut self, other: &BatchDiagnostics) {
        self.calls.extend(other.calls.iter().cloned());
    }

    /// Returns the recorded calls in order.
    pub fn calls(&self) -> &[DispatchRecord] {
        &self.calls
    }

    /// Returns the number of physical calls.
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Returns the number of calls beyond the first.
    pub fn retry_count(&self) -> usize {
        self.calls.len().saturating_sub(1)
    }

    /// Returns the summed charge.
    pub fn total_request_charge(&self) -> f64 {
        self.calls.iter().map(|c| c.request_charge).sum()
    }

    /// Returns the summed latency.
    pub fn total_latency(&self) -> Duration {
        self.calls.iter().map(|c| c.latency).sum()
    }
}

/// Logs dispatches slower than a threshold.
#[derive(Debug)]
pub struct SlowDispatchDetector {
    threshold: Duration,
    total_dispatches: AtomicU64,
    slow_dispatches: AtomicU64,
}

impl SlowDispatchDetector {
    /// Creates a detector with the given threshold.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            total_dispatches: AtomicU64::new(0),
            slow_dispatches: AtomicU64::new(0),
        }
    }

    /// Returns the threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Checks a completed call against the threshold.
    pub fn observe(&self, call: &DispatchRecord) {
        self.total_dispatches.fetch_add(1, Ordering::Relaxed);
        if call.latency > self.threshold {
            self.slow_dispatches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                range_id = %call.range_id,
                operations = call.operation_count,
                round = call.round,
                duration_ms = call.latency.as_millis(),
                threshold_ms = self.threshold.as_millis(),
                "Slow batch dispatch detected"
            );
        }
    }

    /// Returns the number of observed dispatches.
    pub fn total_dispatches(&self) -> u64 {
        self.total_dispatches.load(Ordering::Relaxed)
    }

    /// Returns the number of slow dispatches.
    pub fn slow_dispatches(&self) -> u64 {
        self.slow_dispatches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(latency_ms: u64, charge: f64) -> DispatchRecord {
        DispatchRecord {
            range_id: PartitionKeyRangeId::new("0"),
            status: Some(StatusCode::OK),
            sub_status: SubStatusCode::NONE,
            request_charge: charge,
            latency: Duration::from_millis(latency_ms),
            round: 0,
            operation_count: 1,
            activity_id: None,
        }
    }

    #[test]
    fn test_aggregates() {
        let mut diagnostics = BatchDiagnostics::new();
        assert_eq!(diagnostics.retry_count(), 0);
        diagnostics.record(call(10, 1.5));
        diagnostics.record(call(20, 2.5));
        assert_eq!(diagnostics.call_count(), 2);
        assert_eq!(diagnostics.retry_count(), 1);
        assert_eq!(diagnostics.total_request_charge(), 4.0);
        assert_eq!(diagnostics.total_latency(), Duration::from_millis(30));
    }

    #[test]
    fn test_merge() {
        let mut a = BatchDiagnostics::new();
        a.record(call(1, 1.0));
        let mut b = BatchDiagnostics::new();
        b.record(call(2, 2.0));
        a.merge(&b);
        assert_eq!(a.call_count(), 2);
        assert_eq!(a.calls()[1].latency, Duration::from_millis(2));
    }

    #[test]
    fn test_slow_dispatch_detection() {
        let detector = SlowDispatchDetector::new(Duration::from_millis(50));
        detector.observe(&call(10, 0.0));
        detector.observe(&call(100, 0.0));
        assert_eq!(detector.total_dispatches(), 2);
        assert_eq!(detector.slow_dispatches(), 1);
    }
}
