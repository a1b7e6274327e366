//! Merges the rounds of a logical batch into one ordered response.
//!
//! A logical batch may take several physical calls: a split re-issues the
//! operations against the refreshed range, a throttle re-issues them after a
//! backoff. Each call produces a [`ResponseRound`]. The assembler keeps, per
//! original operation index, the result of the latest round that carried it.

use std::time::Duration;

use docdb_core::{DocDbError, Result, StatusCode, SubStatusCode};
use uuid::Uuid;

use super::response::OperationResult;
use crate::diagnostics::BatchDiagnostics;

/// Outcome of one physical call, aligned with the operations it carried.
#[derive(Debug, Clone)]
pub struct ResponseRound {
    /// Batch-level status.
    pub status_code: StatusCode,
    /// Batch-level sub-status.
    pub sub_status_code: SubStatusCode,
    /// One result per carried operation, in request order.
    pub results: Vec<OperationResult>,
    /// Charge for the call.
    pub request_charge: f64,
    /// Retry hint.
    pub retry_after: Option<Duration>,
    /// Service activity id.
    pub activity_id: Option<Uuid>,
    /// Service diagnostic message.
    pub error_message: Option<String>,
}

/// Final, ordered result of a logical batch.
#[derive(Debug, Clone)]
pub struct AssembledResponse {
    /// Batch-level status of the final round.
    pub status_code: StatusCode,
    /// Batch-level sub-status of the final round.
    pub sub_status_code: SubStatusCode,
    /// One result per original operation, by original index.
    pub results: Vec<OperationResult>,
    /// Charge summed over every round.
    pub request_charge: f64,
    /// Retry hint of the final round.
    pub retry_after: Option<Duration>,
    /// Activity id of the final round.
    pub activity_id: Option<Uuid>,
    /// Diagnostic message of the final round.
    pub error_message: Option<String>,
    /// Every physical call made.
    pub diagnostics: BatchDiagnostics,
}

/// Accumulates rounds for a fixed set of operations.
#[derive(Debug)]
pub struct ResponseAssembler {
    slots: Vec<Option<OperationResult>>,
    last: Option<ResponseRound>,
    request_charge: f64,
    diagnostics: BatchDiagnostics,
}

impl ResponseAssembler {
    /// Creates an assembler for `operation_count` operations.
    pub fn new(operation_count: usize) -> Self {
        Self {
            slots: vec![None; operation_count],
            last: None,
            request_charge: 0.0,
            diagnostics: BatchDiagnostics::new(),
        }
    }

    /// Absorbs a round; `indices[i]` is the original index of `round.results[i]`.
    ///
    /// Later rounds supersede earlier results for the same index.
    pub fn absorb(&mut self, mut round: ResponseRound, indices: &[usize]) -> Result<()> {
        if round.results.len() != indices.len() {
            return Err(DocDbError::Protocol(format!(
                "round carries {} results for {} operations",
                round.results.len(),
                indices.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.slots.len()) {
            return Err(DocDbError::InvalidState(format!(
                "operation index {bad} is outside a batch of {}",
                self.slots.len()
            )));
        }

        for (result, &index) in round.results.drain(..).zip(indices) {
            self.slots[index] = Some(result);
        }
        self.request_charge += round.request_charge;
        self.last = Some(round);
        Ok(())
    }

    /// Records one physical call.
    pub fn record_call(&mut self, call: crate::diagnostics::DispatchRecord) {
        self.diagnostics.record(call);
    }

    /// Returns true once every index has a result.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Produces the ordered response.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no round was absorbed or an index never
    /// received a result.
    pub fn finish(self) -> Result<AssembledResponse> {
        let last = self
            .last
            .ok_or_else(|| DocDbError::InvalidState("no response round was absorbed".to_string()))?;

        let results = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    DocDbError::InvalidState(format!("operation {index} has no result"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AssembledResponse {
            status_code: last.status_code,
            sub_status_code: last.sub_status_code,
            results,
            request_charge: self.request_charge,
            retry_after: last.retry_after,
            activity_id: last.activity_id,
            error_message: last.error_message,
            diagnostics: self.diagnostics,
        })
    }
}
