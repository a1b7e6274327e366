#![no_main]

use libfuzzer_sys::fuzz_target;

use docdb_core::protocol::BatchResponseCodec;

fuzz_target!(|data: &[u8]| {
    if let Ok(results) = BatchResponseCodec::decode(data) {
        let encoded = BatchResponseCodec::encode(&results).expect("re-encode decoded results");
        let again = BatchResponseCodec::decode(&encoded).expect("decode re-encoded results");
        assert_eq!(results.len(), again.len());
    }
});
