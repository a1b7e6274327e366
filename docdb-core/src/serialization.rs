//! Document serializer collaborator.
//!
//! Item bodies travel through the batch engine as opaque byte payloads. A
//! [`DocumentSerializer`] converts typed values to and from those payloads.
//! Serializers are plain values injected where they are needed, so two
//! containers can use different settings without touching shared state.
//!
//! # Example
//!
//! ```
//! use docdb_core::{DocumentSerializer, JsonSerializer};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Order {
//!     id: String,
//!     total: u32,
//! }
//!
//! let serializer = JsonSerializer::default();
//! let bytes = serializer.to_stream(&Order { id: "o1".into(), total: 7 }).unwrap();
//! let order: Order = serializer.from_stream(bytes).unwrap();
//! assert_eq!(order.total, 7);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DocDbError, Result};

/// Converts typed values to and from byte payloads.
///
/// Implementations must fully consume the input payload and must never hand
/// back an empty payload for a value; either condition is reported as a
/// local [`DocDbError::Serialization`] error, not a service error.
pub trait DocumentSerializer: Send + Sync + 'static {
    /// Serializes a value into a payload.
    fn to_stream<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    /// Deserializes a payload into a value.
    fn from_stream<T: DeserializeOwned>(&self, stream: Bytes) -> Result<T>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Creates a compact JSON serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a serializer that emits indented JSON.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl DocumentSerializer for JsonSerializer {
    fn to_stream<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| DocDbError::Serialization(format!("json serialize failed: {e}")))?;

        if encoded.is_empty() {
            return Err(DocDbError::Serialization(
                "serializer produced an empty stream".to_string(),
            ));
        }
        Ok(Bytes::from(encoded))
    }

    fn from_stream<T: DeserializeOwned>(&self, stream: Bytes) -> Result<T> {
        if stream.is_empty() {
            return Err(DocDbError::Serialization("stream is empty".to_string()));
        }
        // from_slice rejects trailing bytes, so the whole stream is consumed.
        serde_json::from_slice(&stream)
            .map_err(|e| DocDbError::Serialization(format!("json deserialize failed: {e}")))
    }
}
