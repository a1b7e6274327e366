//! Batch request and response bodies.
//!
//! A request body is one header record followed by one record per operation;
//! a response body is one record per operation result, in request order.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::codec::RecordCodec;
use super::constants::*;
use super::record::{field_size, Record};
use super::types::{IndexingDirective, OperationType, ResourceType};
use crate::error::{DocDbError, Result};
use crate::status::{StatusCode, SubStatusCode};

/// Header of a batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequestHeader {
    /// Number of operation records that follow.
    pub operation_count: u32,
    /// Operations commit or roll back together.
    pub is_atomic: bool,
    /// The service keeps executing after a failed operation.
    pub continue_on_error: bool,
}

impl BatchRequestHeader {
    fn to_record(self) -> Record {
        let mut flags = 0u8;
        if self.is_atomic {
            flags |= BATCH_FLAG_ATOMIC;
        }
        if self.continue_on_error {
            flags |= BATCH_FLAG_CONTINUE_ON_ERROR;
        }

        let mut record = Record::with_capacity(BATCH_REQUEST_OVERHEAD_BYTES, HEADER_FLAG);
        record.put_u8_field(FIELD_SCHEMA_VERSION, SCHEMA_VERSION);
        record.put_u32_field(FIELD_OPERATION_COUNT, self.operation_count);
        record.put_u8_field(FIELD_BATCH_FLAGS, flags);
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        if !record.is_header() {
            return Err(DocDbError::Protocol(
                "batch request must start with a header record".to_string(),
            ));
        }

        let mut version = None;
        let mut operation_count = None;
        let mut flags = 0u8;
        for field in record.fields() {
            let field = field?;
            match field.id {
                FIELD_SCHEMA_VERSION => version = Some(field.as_u8()?),
                FIELD_OPERATION_COUNT => operation_count = Some(field.as_u32()?),
                FIELD_BATCH_FLAGS => flags = field.as_u8()?,
                _ => {}
            }
        }

        match version {
            Some(SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(DocDbError::Protocol(format!(
                    "unsupported batch schema version {other}"
                )))
            }
            None => {
                return Err(DocDbError::Protocol(
                    "batch header is missing the schema version".to_string(),
                ))
            }
        }

        Ok(Self {
            operation_count: operation_count.ok_or_else(|| {
                DocDbError::Protocol("batch header is missing the operation count".to_string())
            })?,
            is_atomic: flags & BATCH_FLAG_ATOMIC != 0,
            continue_on_error: flags & BATCH_FLAG_CONTINUE_ON_ERROR != 0,
        })
    }
}

/// Wire form of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Position of the operation inside the request.
    pub index: u32,
    /// Operation kind.
    pub operation_type: OperationType,
    /// Targeted resource.
    pub resource_type: ResourceType,
    /// JSON partition key.
    pub partition_key: Option<String>,
    /// Hex effective partition key.
    pub effective_partition_key: Option<String>,
    /// Item id.
    pub id: Option<String>,
    /// Binary item id, used instead of `id` by some callers.
    pub binary_id: Option<Bytes>,
    /// Serialized item body.
    pub resource_body: Option<Bytes>,
    /// Indexing override.
    pub indexing_directive: Option<IndexingDirective>,
    /// Optimistic concurrency etag that must match.
    pub if_match: Option<String>,
    /// Etag that must not match.
    pub if_none_match: Option<String>,
    /// Time-to-live override in seconds.
    pub time_to_live_seconds: Option<i32>,
}

impl OperationRecord {
    /// Creates a record with only the mandatory fields set.
    pub fn new(index: u32, operation_type: OperationType) -> Self {
        Self {
            index,
            operation_type,
            resource_type: ResourceType::Document,
            partition_key: None,
            effective_partition_key: None,
            id: None,
            binary_id: None,
            resource_body: None,
            indexing_directive: None,
            if_match: None,
            if_none_match: None,
            time_to_live_seconds: None,
        }
    }

    /// Returns the exact wire size of this operation without encoding it.
    pub fn encoded_len(&self) -> usize {
        let str_len = |s: &Option<String>| s.as_ref().map_or(0, |s| field_size(s.len()));
        let bytes_len = |b: &Option<Bytes>| b.as_ref().map_or(0, |b| field_size(b.len()));

        RECORD_HEADER_SIZE
            + field_size(4)
            + field_size(1)
            + field_size(1)
            + str_len(&self.partition_key)
            + str_len(&self.effective_partition_key)
            + str_len(&self.id)
            + bytes_len(&self.binary_id)
            + bytes_len(&self.resource_body)
            + self.indexing_directive.map_or(0, |_| field_size(1))
            + str_len(&self.if_match)
            + str_len(&self.if_none_match)
            + self.time_to_live_seconds.map_or(0, |_| field_size(4))
    }

    /// Encodes this operation as a record.
    pub fn to_record(&self) -> Record {
        let mut record =
            Record::with_capacity(self.encoded_len() - RECORD_HEADER_SIZE, OPERATION_FLAG);
        record.put_u32_field(FIELD_OPERATION_INDEX, self.index);
        record.put_u8_field(FIELD_OPERATION_TYPE, self.operation_type.value());
        record.put_u8_field(FIELD_RESOURCE_TYPE, self.resource_type.value());
        if let Some(pk) = &self.partition_key {
            record.put_str_field(FIELD_PARTITION_KEY, pk);
        }
        if let Some(epk) = &self.effective_partition_key {
            record.put_str_field(FIELD_EFFECTIVE_PARTITION_KEY, epk);
        }
        if let Some(id) = &self.id {
            record.put_str_field(FIELD_ID, id);
        }
        if let Some(binary_id) = &self.binary_id {
            record.put_field(FIELD_BINARY_ID, binary_id);
        }
        if let Some(body) = &self.resource_body {
            record.put_field(FIELD_RESOURCE_BODY, body);
        }
        if let Some(directive) = self.indexing_directive {
            record.put_u8_field(FIELD_INDEXING_DIRECTIVE, directive.value());
        }
        if let Some(etag) = &self.if_match {
            record.put_str_field(FIELD_IF_MATCH, etag);
        }
        if let Some(etag) = &self.if_none_match {
            record.put_str_field(FIELD_IF_NONE_MATCH, etag);
        }
        if let Some(ttl) = self.time_to_live_seconds {
            record.put_i32_field(FIELD_TIME_TO_LIVE_SECONDS, ttl);
        }
        record
    }

    /// Decodes an operation record.
    pub fn from_record(record: &Record) -> Result<Self> {
        if !record.is_operation() {
            return Err(DocDbError::Protocol(format!(
                "expected an operation record, found flags 0x{:04X}",
                record.flags
            )));
        }

        let mut index = None;
        let mut operation_type = None;
        let mut op = Self::new(0, OperationType::Read);
        for field in record.fields() {
            let field = field?;
            match field.id {
                FIELD_OPERATION_INDEX => index = Some(field.as_u32()?),
                FIELD_OPERATION_TYPE => {
                    operation_type = Some(OperationType::from_value(field.as_u8()?)?)
                }
                FIELD_RESOURCE_TYPE => {
                    op.resource_type = ResourceType::from_value(field.as_u8()?)?
                }
                FIELD_PARTITION_KEY => op.partition_key = Some(field.as_string()?),
                FIELD_EFFECTIVE_PARTITION_KEY => {
                    op.effective_partition_key = Some(field.as_string()?)
                }
                FIELD_ID => op.id = Some(field.as_string()?),
                FIELD_BINARY_ID => op.binary_id = Some(field.to_bytes()),
                FIELD_RESOURCE_BODY => op.resource_body = Some(field.to_bytes()),
                FIELD_INDEXING_DIRECTIVE => {
                    op.indexing_directive = Some(IndexingDirective::from_value(field.as_u8()?)?)
                }
                FIELD_IF_MATCH => op.if_match = Some(field.as_string()?),
                FIELD_IF_NONE_MATCH => op.if_none_match = Some(field.as_string()?),
                FIELD_TIME_TO_LIVE_SECONDS => op.time_to_live_seconds = Some(field.as_i32()?),
                _ => {}
            }
        }

        op.index = index.ok_or_else(|| {
            DocDbError::Protocol("operation record is missing its index".to_string())
        })?;
        op.operation_type = operation_type.ok_or_else(|| {
            DocDbError::Protocol("operation record is missing its type".to_string())
        })?;
        Ok(op)
    }
}

/// Wire form of one operation result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Status of the operation.
    pub status_code: StatusCode,
    /// Sub-status of the operation.
    pub sub_status_code: SubStatusCode,
    /// Etag of the item after the operation.
    pub etag: Option<String>,
    /// Returned item body.
    pub resource_body: Option<Bytes>,
    /// Charge attributed to this operation.
    pub request_charge: f64,
    /// Retry hint for throttled operations.
    pub retry_after: Option<Duration>,
}

impl ResultRecord {
    /// Creates a result with the given status and no payload.
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            sub_status_code: SubStatusCode::NONE,
            etag: None,
            resource_body: None,
            request_charge: 0.0,
            retry_after: None,
        }
    }

    /// Encodes this result as a record.
    pub fn to_record(&self) -> Record {
        let mut record = Record::with_flags(RESULT_FLAG);
        record.put_u16_field(FIELD_STATUS_CODE, self.status_code.as_u16());
        if self.sub_status_code != SubStatusCode::NONE {
            record.put_u32_field(FIELD_SUB_STATUS_CODE, self.sub_status_code.as_u32());
        }
        if let Some(etag) = &self.etag {
            record.put_str_field(FIELD_ETAG, etag);
        }
        if let Some(body) = &self.resource_body {
            record.put_field(FIELD_RESULT_BODY, body);
        }
        if self.request_charge != 0.0 {
            record.put_f64_field(FIELD_REQUEST_CHARGE, self.request_charge);
        }
        if let Some(retry_after) = self.retry_after {
            let millis = u32::try_from(retry_after.as_millis()).unwrap_or(u32::MAX);
            record.put_u32_field(FIELD_RETRY_AFTER_MILLISECONDS, millis);
        }
        record
    }

    /// Decodes a result record.
    pub fn from_record(record: &Record) -> Result<Self> {
        if !record.is_result() {
            return Err(DocDbError::Protocol(format!(
                "expected a result record, found flags 0x{:04X}",
                record.flags
            )));
        }

        let mut status = None;
        let mut result = Self::new(StatusCode::OK);
        for field in record.fields() {
            let field = field?;
            match field.id {
                FIELD_STATUS_CODE => status = Some(StatusCode::from_u16(field.as_u16()?)),
                FIELD_SUB_STATUS_CODE => {
                    result.sub_status_code = SubStatusCode::from_u32(field.as_u32()?)
                }
                FIELD_ETAG => result.etag = Some(field.as_string()?),
                FIELD_RESULT_BODY => result.resource_body = Some(field.to_bytes()),
                FIELD_REQUEST_CHARGE => result.request_charge = field.as_f64()?,
                FIELD_RETRY_AFTER_MILLISECONDS => {
                    result.retry_after = Some(Duration::from_millis(field.as_u32()? as u64))
                }
                _ => {}
            }
        }

        result.status_code = status.ok_or_else(|| {
            DocDbError::Protocol("result record is missing its status code".to_string())
        })?;
        Ok(result)
    }
}

/// Encodes and decodes whole batch request bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchRequestCodec;

impl BatchRequestCodec {
    /// Encodes a header plus operations into a request body.
    pub fn encode(header: BatchRequestHeader, operations: &[OperationRecord]) -> Result<Bytes> {
        if header.operation_count as usize != operations.len() {
            return Err(DocDbError::Protocol(format!(
                "header declares {} operations, {} supplied",
                header.operation_count,
                operations.len()
            )));
        }

        let capacity = BATCH_REQUEST_OVERHEAD_BYTES
            + operations.iter().map(OperationRecord::encoded_len).sum::<usize>();
        let mut dst = BytesMut::with_capacity(capacity);
        let mut codec = RecordCodec::new();
        codec.encode(header.to_record(), &mut dst)?;
        for op in operations {
            codec.encode(op.to_record(), &mut dst)?;
        }
        Ok(dst.freeze())
    }

    /// Decodes a request body.
    pub fn decode(body: &[u8]) -> Result<(BatchRequestHeader, Vec<OperationRecord>)> {
        let mut records = decode_records(body)?.into_iter();
        let header = records
            .next()
            .ok_or_else(|| DocDbError::Protocol("empty batch request body".to_string()))
            .and_then(|r| BatchRequestHeader::from_record(&r))?;

        let operations = records
            .map(|r| OperationRecord::from_record(&r))
            .collect::<Result<Vec<_>>>()?;
        if operations.len() != header.operation_count as usize {
            return Err(DocDbError::Protocol(format!(
                "header declares {} operations, body holds {}",
                header.operation_count,
                operations.len()
            )));
        }
        Ok((header, operations))
    }
}

/// Encodes and decodes whole batch response bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResponseCodec;

impl BatchResponseCodec {
    /// Encodes results into a response body.
    pub fn encode(results: &[ResultRecord]) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        let mut codec = RecordCodec::new();
        for result in results {
            codec.encode(result.to_record(), &mut dst)?;
        }
        Ok(dst.freeze())
    }

    /// Decodes a response body into results in request order.
    pub fn decode(body: &[u8]) -> Result<Vec<ResultRecord>> {
        decode_records(body)?
            .iter()
            .map(ResultRecord::from_record)
            .collect()
    }
}

fn decode_records(body: &[u8]) -> Result<Vec<Record>> {
    let mut src = BytesMut::from(body);
    let mut codec = RecordCodec::new();
    let mut records = Vec::new();
    while let Some(record) = codec.decode(&mut src)? {
        records.push(record);
    }
    if !src.is_empty() {
        return Err(DocDbError::Protocol(format!(
            "{} trailing bytes after the last complete record",
            src.len()
        )));
    }
    Ok(records)
}
