//! Logical partition keys and their effective (hashed) form.
//!
//! A [`PartitionKey`] is the value a caller supplies to scope an operation.
//! The service routes on the [`EffectivePartitionKey`], a hash of the
//! components that places the key inside exactly one partition key range.
//!
//! # Example
//!
//! ```
//! use docdb_core::PartitionKey;
//!
//! let pk = PartitionKey::from("customer-42");
//! assert_eq!(pk.to_json(), r#"["customer-42"]"#);
//!
//! // Equal keys always hash to the same effective key.
//! assert_eq!(
//!     pk.effective_partition_key(),
//!     PartitionKey::from("customer-42").effective_partition_key()
//! );
//! ```

use std::fmt;

use serde_json::Value;

/// One component of a (possibly hierarchical) partition key.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionKeyValue {
    /// JSON `null`.
    Null,
    /// A boolean component.
    Bool(bool),
    /// A numeric component.
    Number(f64),
    /// A string component.
    String(String),
}

impl PartitionKeyValue {
    fn to_json_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    fn write_hash_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(0x01),
            Self::Bool(false) => out.push(0x02),
            Self::Bool(true) => out.push(0x03),
            Self::Number(n) => {
                out.push(0x05);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Self::String(s) => {
                out.push(0x08);
                out.extend_from_slice(s.as_bytes());
                out.push(0xff);
            }
        }
    }
}

impl From<&str> for PartitionKeyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PartitionKeyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PartitionKeyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PartitionKeyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for PartitionKeyValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// A logical partition key.
///
/// Every operation in a transactional batch shares one partition key. Keys
/// are compared component-wise; the JSON rendering is what travels on the
/// wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionKey {
    components: Vec<PartitionKeyValue>,
}

impl PartitionKey {
    /// Creates a single-component partition key.
    pub fn new(value: impl Into<PartitionKeyValue>) -> Self {
        Self {
            components: vec![value.into()],
        }
    }

    /// Creates a hierarchical partition key from ordered components.
    pub fn hierarchical(components: impl IntoIterator<Item = PartitionKeyValue>) -> Self {
        Self {
            components: components.into_iter().collect(),
        }
    }

    /// Creates the `null` partition key.
    pub fn null() -> Self {
        Self::new(PartitionKeyValue::Null)
    }

    /// Returns the key components.
    pub fn components(&self) -> &[PartitionKeyValue] {
        &self.components
    }

    /// Renders the key as the JSON array sent on the wire.
    pub fn to_json(&self) -> String {
        Value::Array(self.components.iter().map(|c| c.to_json_value()).collect()).to_string()
    }

    /// Computes the effective partition key used for range routing.
    pub fn effective_partition_key(&self) -> EffectivePartitionKey {
        let mut bytes = Vec::with_capacity(16 * self.components.len());
        for component in &self.components {
            component.write_hash_bytes(&mut bytes);
        }
        EffectivePartitionKey(murmur_hash3_x86_32(&bytes, EPK_HASH_SEED))
    }
}

impl<T: Into<PartitionKeyValue>> From<T> for PartitionKey {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

const EPK_HASH_SEED: u32 = 0;

/// The hashed form of a [`PartitionKey`]; ranges partition the `u32` space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectivePartitionKey(u32);

impl EffectivePartitionKey {
    /// Smallest effective key.
    pub const MIN: EffectivePartitionKey = EffectivePartitionKey(0);
    /// Largest effective key.
    pub const MAX: EffectivePartitionKey = EffectivePartitionKey(u32::MAX);

    /// Wraps a raw hash value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw hash value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the fixed-width hex rendering carried in request records.
    pub fn to_hex(&self) -> String {
        format!("{:08X}", self.0)
    }
}

impl fmt::Display for EffectivePartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// MurmurHash3 x86 32-bit.
fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    fn mix(k: u32) -> u32 {
        k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
    }

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h1 ^= mix(k1);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= (*byte as u32) << (8 * i);
        }
        h1 ^= mix(k1);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rendering() {
        assert_eq!(PartitionKey::from("a").to_json(), r#"["a"]"#);
        assert_eq!(PartitionKey::null().to_json(), "[null]");
        assert_eq!(PartitionKey::from(true).to_json(), "[true]");
        let hpk = PartitionKey::hierarchical(vec!["tenant".into(), 7i64.into()]);
        assert_eq!(hpk.to_json(), r#"["tenant",7.0]"#);
    }

    #[test]
    fn test_same_key_same_epk() {
        let a = PartitionKey::from("cust-42").effective_partition_key();
        let b = PartitionKey::from("cust-42".to_string()).effective_partition_key();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_keys_different_epk() {
        let a = PartitionKey::from("cust-42").effective_partition_key();
        let b = PartitionKey::from("cust-99").effective_partition_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_type_marker_distinguishes_string_from_bool() {
        let s = PartitionKey::from("true").effective_partition_key();
        let b = PartitionKey::from(true).effective_partition_key();
        assert_ne!(s, b);
    }

    #[test]
    fn test_murmur_known_vectors() {
        assert_eq!(murmur_hash3_x86_32(b"", 0), 0);
        assert_eq!(murmur_hash3_x86_32(b"", 1), 0x514E28B7);
        assert_eq!(murmur_hash3_x86_32(b"test", 0), 0xBA6BD213);
        assert_eq!(murmur_hash3_x86_32(b"Hello, world!", 0), 0xC0363E43);
    }

    #[test]
    fn test_epk_hex_is_fixed_width() {
        assert_eq!(EffectivePartitionKey::from_u32(0xAB).to_hex(), "000000AB");
        assert_eq!(EffectivePartitionKey::MAX.to_hex(), "FFFFFFFF");
    }
}
