//! Greedy request packing.

use std::sync::Arc;

use docdb_core::protocol::BATCH_REQUEST_OVERHEAD_BYTES;
use docdb_core::{DocDbError, Result};

use super::operation::ItemOperation;
use crate::config::MAX_BATCH_BODY_BYTES;

/// Operations selected for one physical request.
#[derive(Debug)]
pub struct PackedRequest {
    /// Ordered prefix that fits the budgets.
    pub included: Vec<Arc<ItemOperation>>,
    /// Deferred complement, in original order.
    pub remaining: Vec<Arc<ItemOperation>>,
    /// Body size of `included`, request overhead included.
    pub body_bytes: usize,
}

/// Returns how many leading items of `sizes` fit into one request.
///
/// The running total starts at the per-request overhead. The first item is
/// always taken, so non-empty input never yields zero.
pub fn fitting_prefix(sizes: &[usize], max_bytes: usize, max_count: usize) -> (usize, usize) {
    let mut total = BATCH_REQUEST_OVERHEAD_BYTES;
    let mut count = 0;
    for &size in sizes {
        if count > 0 && (count >= max_count || total + size > max_bytes) {
            break;
        }
        total += size;
        count += 1;
    }
    (count, total)
}

/// Splits `operations` into the maximal ordered prefix fitting both budgets
/// and the remainder.
///
/// # Errors
///
/// Returns `EntityTooLarge` when the selected prefix exceeds the absolute
/// body limit, which only happens for a single oversized operation.
pub fn pack(
    operations: Vec<Arc<ItemOperation>>,
    max_bytes: usize,
    max_count: usize,
) -> Result<PackedRequest> {
    let sizes = operations
        .iter()
        .map(|op| op.encoded_size())
        .collect::<Result<Vec<_>>>()?;
    let (count, body_bytes) = fitting_prefix(&sizes, max_bytes, max_count);

    if body_bytes > MAX_BATCH_BODY_BYTES {
        return Err(DocDbError::EntityTooLarge(format!(
            "request body of {body_bytes} bytes exceeds the {MAX_BATCH_BODY_BYTES} byte limit"
        )));
    }

    let mut included = operations;
    let remaining = included.split_off(count);
    Ok(PackedRequest {
        included,
        remaining,
        body_bytes,
    })
}
