#![no_main]

use libfuzzer_sys::fuzz_target;

use docdb_core::protocol::BatchRequestCodec;

fuzz_target!(|data: &[u8]| {
    if let Ok((header, operations)) = BatchRequestCodec::decode(data) {
        assert_eq!(header.operation_count as usize, operations.len());
        for operation in &operations {
            let _ = operation.encoded_len();
        }
    }
});
