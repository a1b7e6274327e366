//! Streaming codec for batch payload records.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::record::Record;
use crate::error::{DocDbError, Result};

/// Codec for encoding and decoding [`Record`]s.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits so a record
/// stream can be read from framed I/O as well as from a complete body.
#[derive(Debug, Default)]
pub struct RecordCodec {
    max_record_size: Option<usize>,
}

impl RecordCodec {
    /// Creates a codec with no record size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec that rejects records larger than `max_record_size` bytes.
    pub fn with_max_record_size(max_record_size: usize) -> Self {
        Self {
            max_record_size: Some(max_record_size),
        }
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = DocDbError;

    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<()> {
        if let Some(max) = self.max_record_size {
            if item.wire_size() > max {
                return Err(DocDbError::EntityTooLarge(format!(
                    "record of {} bytes exceeds the {max} byte limit",
                    item.wire_size()
                )));
            }
        }
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for RecordCodec {
    type Item = Record;
    type Error = DocDbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let (Some(max), true) = (self.max_record_size, src.len() >= 4) {
            let declared = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if declared + 4 > max {
                return Err(DocDbError::Protocol(format!(
                    "record declares {declared} bytes, limit is {max}"
                )));
            }
        }
        Record::read_from(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    fn sample(id: &str) -> Record {
        let mut record = Record::with_flags(OPERATION_FLAG);
        record.put_str_field(FIELD_ID, id);
        record
    }

    #[test]
    fn test_encode_decode_stream() {
        let mut codec = RecordCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample("a"), &mut buf).unwrap();
        codec.encode(sample("bb"), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, sample("a"));
        assert_eq!(second, sample("bb"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_record_waits_for_more_data() {
        let mut codec = RecordCodec::new();
        let mut full = BytesMut::new();
        codec.encode(sample("abcdef"), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(full);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_encode_rejects_oversized_record() {
        let mut codec = RecordCodec::with_max_record_size(8);
        let mut buf = BytesMut::new();
        let err = codec.encode(sample("too-long"), &mut buf).unwrap_err();
        assert!(matches!(err, DocDbError::EntityTooLarge(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_declaration() {
        let mut codec = RecordCodec::with_max_record_size(16);
        let mut buf = BytesMut::from(&[0xFF, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DocDbError::Protocol(_))
        ));
    }
}
