//! Core types and wire formats for the docdb client.

#![warn(missing_docs)]

pub mod error;
pub mod partition_key;
pub mod protocol;
pub mod serialization;
pub mod status;

pub use error::{DocDbError, Result};
pub use partition_key::{EffectivePartitionKey, PartitionKey, PartitionKeyValue};
pub use serialization::{DocumentSerializer, JsonSerializer};
pub use status::{StatusCode, SubStatusCode};
