//! Property-based tests for request packing and batcher capacity.

use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use docdb_client::batch::{
    fitting_prefix, pack, AssembledResponse, BatchExecutor, Batcher, BodySource, ItemOperation,
};
use docdb_client::{CancellationToken, DocDbError, Result};
use docdb_core::protocol::{OperationType, BATCH_REQUEST_OVERHEAD_BYTES};
use proptest::prelude::*;

const O: usize = BATCH_REQUEST_OVERHEAD_BYTES;

struct UnusedExecutor;

#[async_trait]
impl BatchExecutor for UnusedExecutor {
    async fn execute_batch(
        &self,
        _operations: Vec<Arc<ItemOperation>>,
        _cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        Err(DocDbError::InvalidState("not dispatched in these tests".to_string()))
    }
}

fn op(index: usize, body_len: usize) -> Arc<ItemOperation> {
    Arc::new(ItemOperation::new(
        OperationType::Create,
        index,
        None,
        None,
        Some(BodySource::Bytes(Bytes::from(vec![b'x'; body_len]))),
        None,
    ))
}

/// Longest prefix within both budgets, by exhaustive search.
fn brute_force_prefix(sizes: &[usize], max_bytes: usize, max_count: usize) -> usize {
    (1..=sizes.len())
        .filter(|&k| k <= max_count && O + sizes[..k].iter().sum::<usize>() <= max_bytes)
        .max()
        .unwrap_or(sizes.len().min(1))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn fitting_prefix_is_maximal(
        sizes in prop::collection::vec(0usize..500, 0..40),
        max_bytes in 0usize..4_000,
        max_count in 0usize..50,
    ) {
        let (count, total) = fitting_prefix(&sizes, max_bytes, max_count);

        prop_assert_eq!(count, brute_force_prefix(&sizes, max_bytes, max_count));
        prop_assert_eq!(total, O + sizes[..count].iter().sum::<usize>());
        if count > 1 {
            prop_assert!(total <= max_bytes);
            prop_assert!(count <= max_count);
        }
    }

    #[test]
    fn pack_splits_into_prefix_and_exact_complement(
        body_lens in prop::collection::vec(0usize..300, 1..40),
        max_bytes in 0usize..6_000,
        max_count in 1usize..30,
    ) {
        let operations: Vec<_> = body_lens
            .iter()
            .enumerate()
            .map(|(i, &len)| op(i, len))
            .collect();
        let sizes: Vec<_> = operations
            .iter()
            .map(|op| op.encoded_size().unwrap())
            .collect();

        let packed = pack(operations, max_bytes, max_count).unwrap();
        let (expected, body_bytes) = fitting_prefix(&sizes, max_bytes, max_count);

        prop_assert!(!packed.included.is_empty());
        prop_assert_eq!(packed.included.len(), expected);
        prop_assert_eq!(packed.body_bytes, body_bytes);

        let order: Vec<_> = packed
            .included
            .iter()
            .chain(packed.remaining.iter())
            .map(|op| op.index())
            .collect();
        prop_assert_eq!(order, (0..body_lens.len()).collect::<Vec<_>>());

        if let Some(next) = packed.remaining.first() {
            let next_size = next.encoded_size().unwrap();
            prop_assert!(
                packed.included.len() >= max_count || body_bytes + next_size > max_bytes
            );
        }
    }

    #[test]
    fn concurrent_adds_never_overflow_budgets(
        body_lens in prop::collection::vec(0usize..200, 1..80),
        threads in 2usize..6,
        max_operations in 1usize..30,
        extra_bytes in 0usize..3_000,
    ) {
        let largest = body_lens
            .iter()
            .map(|&len| op(0, len).encoded_size().unwrap())
            .max()
            .unwrap_or(0);
        let max_bytes = largest + extra_bytes;
        let batcher = Batcher::new(max_operations, max_bytes, Arc::new(UnusedExecutor));
        let accepted = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for t in 0..threads {
                let batcher = &batcher;
                let accepted = &accepted;
                let body_lens = &body_lens;
                scope.spawn(move || {
                    for (i, &len) in body_lens.iter().enumerate().skip(t).step_by(threads) {
                        let operation = op(i, len);
                        let size = operation.encoded_size().unwrap();
                        if batcher.try_add(operation).unwrap() {
                            accepted.lock().unwrap().push(size);
                        }
                    }
                });
            }
        });

        let accepted = accepted.into_inner().unwrap();
        prop_assert!(batcher.len() <= max_operations);
        prop_assert!(batcher.size_bytes() <= max_bytes);
        prop_assert_eq!(batcher.len(), accepted.len());
        prop_assert_eq!(batcher.size_bytes(), accepted.iter().sum::<usize>());
    }
}
