//! Record type for the batch payload format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::{DocDbError, Result};

/// A single record in a batch request or response body.
///
/// Each record consists of:
/// - A 4-byte length field (little-endian), counting flags and content
/// - A 2-byte flags field (little-endian)
/// - A sequence of fields, each `[u8 id][u32 LE length][bytes]`
///
/// Absent (null) values are encoded by omitting the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record content (fields after the flags).
    pub content: BytesMut,
    /// Record flags indicating what the record describes.
    pub flags: u16,
}

impl Record {
    /// Creates a record with the given content and flags.
    pub fn new(content: BytesMut, flags: u16) -> Self {
        Self { content, flags }
    }

    /// Creates an empty record with the given flags.
    pub fn with_flags(flags: u16) -> Self {
        Self::new(BytesMut::new(), flags)
    }

    /// Creates an empty record with the given capacity and flags.
    pub fn with_capacity(capacity: usize, flags: u16) -> Self {
        Self::new(BytesMut::with_capacity(capacity), flags)
    }

    /// Returns true if this is a request header record.
    pub fn is_header(&self) -> bool {
        self.flags & HEADER_FLAG != 0
    }

    /// Returns true if this record describes a request operation.
    pub fn is_operation(&self) -> bool {
        self.flags & OPERATION_FLAG != 0
    }

    /// Returns true if this record describes an operation result.
    pub fn is_result(&self) -> bool {
        self.flags & RESULT_FLAG != 0
    }

    /// Appends a raw field.
    pub fn put_field(&mut self, id: u8, value: &[u8]) {
        self.content.reserve(FIELD_HEADER_SIZE + value.len());
        self.content.put_u8(id);
        self.content.put_u32_le(value.len() as u32);
        self.content.put_slice(value);
    }

    /// Appends a `u8` field.
    pub fn put_u8_field(&mut self, id: u8, value: u8) {
        self.put_field(id, &[value]);
    }

    /// Appends a little-endian `u16` field.
    pub fn put_u16_field(&mut self, id: u8, value: u16) {
        self.put_field(id, &value.to_le_bytes());
    }

    /// Appends a little-endian `u32` field.
    pub fn put_u32_field(&mut self, id: u8, value: u32) {
        self.put_field(id, &value.to_le_bytes());
    }

    /// Appends a little-endian `i32` field.
    pub fn put_i32_field(&mut self, id: u8, value: i32) {
        self.put_field(id, &value.to_le_bytes());
    }

    /// Appends a little-endian `f64` field.
    pub fn put_f64_field(&mut self, id: u8, value: f64) {
        self.put_field(id, &value.to_le_bytes());
    }

    /// Appends a utf-8 string field.
    pub fn put_str_field(&mut self, id: u8, value: &str) {
        self.put_field(id, value.as_bytes());
    }

    /// Returns an iterator over the fields of this record.
    pub fn fields(&self) -> Fields<'_> {
        Fields {
            remaining: &self.content,
        }
    }

    /// Returns the size of this record on the wire.
    pub fn wire_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.content.len()
    }

    /// Returns the value written in the length field (flags + content).
    pub fn record_length(&self) -> usize {
        SIZE_OF_RECORD_FLAGS_FIELD + self.content.len()
    }

    /// Writes this record to the given buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_u32_le(self.record_length() as u32);
        dst.put_u16_le(self.flags);
        dst.put_slice(&self.content);
    }

    /// Reads a record from the given buffer.
    ///
    /// Returns `Ok(None)` if there isn't enough data for a complete record,
    /// leaving `src` untouched.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < SIZE_OF_RECORD_LENGTH_FIELD {
            return Ok(None);
        }

        let record_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if record_length < SIZE_OF_RECORD_FLAGS_FIELD {
            return Err(DocDbError::Protocol(format!(
                "record length {record_length} is smaller than the flags field"
            )));
        }

        let total = SIZE_OF_RECORD_LENGTH_FIELD + record_length;
        if src.len() < total {
            return Ok(None);
        }

        src.advance(SIZE_OF_RECORD_LENGTH_FIELD);
        let flags = src.get_u16_le();
        let content = src.split_to(record_length - SIZE_OF_RECORD_FLAGS_FIELD);

        Ok(Some(Self::new(content, flags)))
    }
}

/// Returns the wire size of a field holding `value_len` bytes.
pub const fn field_size(value_len: usize) -> usize {
    FIELD_HEADER_SIZE + value_len
}

/// A field read back from a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field identifier.
    pub id: u8,
    /// Raw field value.
    pub value: &'a [u8],
}

impl<'a> Field<'a> {
    /// Reads the value as a `u8`.
    pub fn as_u8(&self) -> Result<u8> {
        Ok(self.fixed::<1>()?[0])
    }

    /// Reads the value as a little-endian `u16`.
    pub fn as_u16(&self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.fixed::<2>()?))
    }

    /// Reads the value as a little-endian `u32`.
    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.fixed::<4>()?))
    }

    /// Reads the value as a little-endian `i32`.
    pub fn as_i32(&self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.fixed::<4>()?))
    }

    /// Reads the value as a little-endian `f64`.
    pub fn as_f64(&self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.fixed::<8>()?))
    }

    /// Reads the value as a utf-8 string.
    pub fn as_string(&self) -> Result<String> {
        String::from_utf8(self.value.to_vec()).map_err(|e| {
            DocDbError::Protocol(format!("field 0x{:02X} is not valid utf-8: {e}", self.id))
        })
    }

    /// Copies the value into an owned buffer.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.value)
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        self.value.try_into().map_err(|_| {
            DocDbError::Protocol(format!(
                "field 0x{:02X} has length {}, expected {N}",
                self.id,
                self.value.len()
            ))
        })
    }
}

/// Iterator over the fields of a record.
#[derive(Debug)]
pub struct Fields<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        if self.remaining.len() < FIELD_HEADER_SIZE {
            self.remaining = &[];
            return Some(Err(DocDbError::Protocol(
                "truncated field header".to_string(),
            )));
        }

        let id = self.remaining[0];
        let len = u32::from_le_bytes([
            self.remaining[1],
            self.remaining[2],
            self.remaining[3],
            self.remaining[4],
        ]) as usize;
        let rest = &self.remaining[FIELD_HEADER_SIZE..];
        if rest.len() < len {
            self.remaining = &[];
            return Some(Err(DocDbError::Protocol(format!(
                "field 0x{id:02X} declares {len} bytes, {} available",
                rest.len()
            ))));
        }

        let (value, tail) = rest.split_at(len);
        self.remaining = tail;
        Some(Ok(Field { id, value }))
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::with_flags(DEFAULT_FLAGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flags() {
        assert!(Record::with_flags(HEADER_FLAG).is_header());
        assert!(Record::with_flags(OPERATION_FLAG).is_operation());
        assert!(Record::with_flags(RESULT_FLAG).is_result());
        assert!(!Record::default().is_header());
    }

    #[test]
    fn test_wire_size() {
        let empty = Record::default();
        assert_eq!(empty.wire_size(), 6);
        assert_eq!(empty.record_length(), 2);

        let mut record = Record::default();
        record.put_str_field(FIELD_ID, "abc");
        assert_eq!(record.wire_size(), 6 + field_size(3));
    }

    #[test]
    fn test_write_and_read_record() {
        let mut original = Record::with_flags(OPERATION_FLAG);
        original.put_u8_field(FIELD_OPERATION_TYPE, 3);
        original.put_str_field(FIELD_ID, "item-1");

        let mut buf = BytesMut::new();
        original.write_to(&mut buf);
        assert_eq!(buf.len(), original.wire_size());

        let decoded = Record::read_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fields_iteration() {
        let mut record = Record::default();
        record.put_u16_field(FIELD_STATUS_CODE, 201);
        record.put_f64_field(FIELD_REQUEST_CHARGE, 5.25);
        record.put_str_field(FIELD_ETAG, "\"0x1\"");

        let fields: Vec<_> = record.fields().collect::<Result<_>>().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].as_u16().unwrap(), 201);
        assert_eq!(fields[1].as_f64().unwrap(), 5.25);
        assert_eq!(fields[2].as_string().unwrap(), "\"0x1\"");
    }

    #[test]
    fn test_read_incomplete_length() {
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);
        assert!(Record::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_read_incomplete_content() {
        let mut buf = BytesMut::from(
            &[
                0x06, 0x00, 0x00, 0x00, // length = 6 (flags + 4 bytes content)
                0x00, 0x40, // flags
                0x01, 0x02, // only 2 bytes of content
            ][..],
        );
        assert!(Record::read_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_read_length_smaller_than_flags() {
        let mut buf = BytesMut::from(&[0x01, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            Record::read_from(&mut buf),
            Err(DocDbError::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_field_is_error() {
        let record = Record::new(BytesMut::from(&[FIELD_ID, 0x09, 0x00, 0x00, 0x00, b'a'][..]), 0);
        let result: Result<Vec<_>> = record.fields().collect();
        assert!(matches!(result, Err(DocDbError::Protocol(_))));
    }

    #[test]
    fn test_fixed_width_mismatch() {
        let mut record = Record::default();
        record.put_field(FIELD_STATUS_CODE, &[1, 2, 3]);
        let field = record.fields().next().unwrap().unwrap();
        assert!(field.as_u16().is_err());
    }
}
