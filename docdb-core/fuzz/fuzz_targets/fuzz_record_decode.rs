#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use docdb_core::protocol::Record;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    while !buf.is_empty() {
        match Record::read_from(&mut buf) {
            Ok(Some(record)) => {
                let _ = record.is_header();
                let _ = record.is_operation();
                let _ = record.is_result();
                let _ = record.wire_size();
                for field in record.fields() {
                    match field {
                        Ok(field) => {
                            let _ = field.as_u32();
                            let _ = field.as_string();
                        }
                        Err(_) => break,
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
});
