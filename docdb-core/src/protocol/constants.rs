//! Constants for the batch record wire format.

/// Size of the record length field in bytes.
pub const SIZE_OF_RECORD_LENGTH_FIELD: usize = 4;

/// Size of the record flags field in bytes.
pub const SIZE_OF_RECORD_FLAGS_FIELD: usize = 2;

/// Total record header size (length + flags).
pub const RECORD_HEADER_SIZE: usize = SIZE_OF_RECORD_LENGTH_FIELD + SIZE_OF_RECORD_FLAGS_FIELD;

/// Size of a field header (one byte id + four byte length).
pub const FIELD_HEADER_SIZE: usize = 1 + 4;

/// Marks the batch request header record.
pub const HEADER_FLAG: u16 = 1 << 15;

/// Marks a record describing one operation of a request.
pub const OPERATION_FLAG: u16 = 1 << 14;

/// Marks a record describing one operation result of a response.
pub const RESULT_FLAG: u16 = 1 << 13;

/// Default record flags (no special flags set).
pub const DEFAULT_FLAGS: u16 = 0;

/// Schema version written into every request header.
pub const SCHEMA_VERSION: u8 = 1;

/// Header flag bit: operations must commit or roll back together.
pub const BATCH_FLAG_ATOMIC: u8 = 1 << 0;

/// Header flag bit: keep executing after a failed operation (non-atomic only).
pub const BATCH_FLAG_CONTINUE_ON_ERROR: u8 = 1 << 1;

// Request header fields.

/// Header field: schema version (u8).
pub const FIELD_SCHEMA_VERSION: u8 = 0x01;
/// Header field: operation count (u32).
pub const FIELD_OPERATION_COUNT: u8 = 0x02;
/// Header field: batch flags (u8).
pub const FIELD_BATCH_FLAGS: u8 = 0x03;

/// Exact wire size of the request header record.
///
/// The request packer starts every running byte total at this value.
pub const BATCH_REQUEST_OVERHEAD_BYTES: usize =
    RECORD_HEADER_SIZE + (FIELD_HEADER_SIZE + 1) + (FIELD_HEADER_SIZE + 4) + (FIELD_HEADER_SIZE + 1);

// Operation record fields.

/// Operation field: position of the operation in the request (u32).
pub const FIELD_OPERATION_INDEX: u8 = 0x10;
/// Operation field: operation type (u8).
pub const FIELD_OPERATION_TYPE: u8 = 0x11;
/// Operation field: resource type (u8).
pub const FIELD_RESOURCE_TYPE: u8 = 0x12;
/// Operation field: JSON partition key (utf-8).
pub const FIELD_PARTITION_KEY: u8 = 0x13;
/// Operation field: effective partition key (hex utf-8).
pub const FIELD_EFFECTIVE_PARTITION_KEY: u8 = 0x14;
/// Operation field: item id (utf-8).
pub const FIELD_ID: u8 = 0x15;
/// Operation field: binary item id (raw bytes).
pub const FIELD_BINARY_ID: u8 = 0x16;
/// Operation field: resource body (raw bytes).
pub const FIELD_RESOURCE_BODY: u8 = 0x17;
/// Operation field: indexing directive (u8).
pub const FIELD_INDEXING_DIRECTIVE: u8 = 0x18;
/// Operation field: if-match etag (utf-8).
pub const FIELD_IF_MATCH: u8 = 0x19;
/// Operation field: if-none-match etag (utf-8).
pub const FIELD_IF_NONE_MATCH: u8 = 0x1A;
/// Operation field: time to live override in seconds (i32).
pub const FIELD_TIME_TO_LIVE_SECONDS: u8 = 0x1B;

// Result record fields.

/// Result field: status code (u16).
pub const FIELD_STATUS_CODE: u8 = 0x30;
/// Result field: sub-status code (u32).
pub const FIELD_SUB_STATUS_CODE: u8 = 0x31;
/// Result field: etag (utf-8).
pub const FIELD_ETAG: u8 = 0x32;
/// Result field: resource body (raw bytes).
pub const FIELD_RESULT_BODY: u8 = 0x33;
/// Result field: request charge (f64).
pub const FIELD_REQUEST_CHARGE: u8 = 0x34;
/// Result field: retry-after hint in milliseconds (u32).
pub const FIELD_RETRY_AFTER_MILLISECONDS: u8 = 0x35;
