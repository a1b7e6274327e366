//! Binary payload format for batch requests and responses.
//!
//! Operations and results travel as length-prefixed records made of tagged
//! fields. The format is row-based: one record per operation, in request
//! order, so the response can be matched to the request positionally.

mod batch;
mod codec;
pub mod constants;
mod record;
mod types;

pub use batch::{
    BatchRequestCodec, BatchRequestHeader, BatchResponseCodec, OperationRecord, ResultRecord,
};
pub use codec::RecordCodec;
pub use constants::BATCH_REQUEST_OVERHEAD_BYTES;
pub use record::{field_size, Field, Fields, Record};
pub use types::{IndexingDirective, OperationType, ResourceType};
