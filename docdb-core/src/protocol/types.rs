//! Enumerations carried in batch operation records.

use std::fmt;

use crate::error::{DocDbError, Result};

/// The kind of point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    /// Insert a new item; fails with 409 if it exists.
    Create = 0,
    /// Read an item by id.
    Read = 1,
    /// Replace an existing item; fails with 404 if missing.
    Replace = 2,
    /// Insert or replace an item.
    Upsert = 3,
    /// Delete an item by id.
    Delete = 4,
    /// Apply partial updates to an item.
    Patch = 5,
    /// Charge-accounting marker; carries no item and executes nothing.
    AddComputeCharges = 6,
}

impl OperationType {
    /// Returns the wire value.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Parses a wire value.
    pub fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Create,
            1 => Self::Read,
            2 => Self::Replace,
            3 => Self::Upsert,
            4 => Self::Delete,
            5 => Self::Patch,
            6 => Self::AddComputeCharges,
            other => {
                return Err(DocDbError::Protocol(format!(
                    "unknown operation type {other}"
                )))
            }
        })
    }

    /// Returns true if the operation carries a resource body.
    pub fn has_body(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Replace | Self::Upsert | Self::Patch
        )
    }

    /// Returns true if the operation addresses its item by id.
    pub fn requires_id(&self) -> bool {
        matches!(
            self,
            Self::Read | Self::Replace | Self::Delete | Self::Patch
        )
    }

    /// Returns true if the operation modifies data.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Read | Self::AddComputeCharges)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Replace => "Replace",
            Self::Upsert => "Upsert",
            Self::Delete => "Delete",
            Self::Patch => "Patch",
            Self::AddComputeCharges => "AddComputeCharges",
        };
        f.write_str(name)
    }
}

/// The resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ResourceType {
    /// A document (item) inside a container.
    #[default]
    Document = 2,
}

impl ResourceType {
    /// Returns the wire value.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Parses a wire value.
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::Document),
            other => Err(DocDbError::Protocol(format!(
                "unknown resource type {other}"
            ))),
        }
    }
}

/// Per-operation override of the container's indexing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IndexingDirective {
    /// Use the container's indexing policy.
    #[default]
    Default = 0,
    /// Index the item.
    Include = 1,
    /// Do not index the item.
    Exclude = 2,
}

impl IndexingDirective {
    /// Returns the wire value.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Parses a wire value.
    pub fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Default,
            1 => Self::Include,
            2 => Self::Exclude,
            other => {
                return Err(DocDbError::Protocol(format!(
                    "unknown indexing directive {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_values_round_trip() {
        for op in [
            OperationType::Create,
            OperationType::Read,
            OperationType::Replace,
            OperationType::Upsert,
            OperationType::Delete,
            OperationType::Patch,
            OperationType::AddComputeCharges,
        ] {
            assert_eq!(OperationType::from_value(op.value()).unwrap(), op);
        }
        assert!(OperationType::from_value(42).is_err());
    }

    #[test]
    fn test_operation_type_shape() {
        assert!(OperationType::Create.has_body());
        assert!(!OperationType::Create.requires_id());
        assert!(OperationType::Read.requires_id());
        assert!(!OperationType::Read.has_body());
        assert!(!OperationType::Delete.has_body());
        assert!(OperationType::Patch.has_body());
        assert!(!OperationType::AddComputeCharges.is_write());
    }

    #[test]
    fn test_indexing_directive_values() {
        assert_eq!(IndexingDirective::from_value(2).unwrap(), IndexingDirective::Exclude);
        assert!(IndexingDirective::from_value(9).is_err());
        assert_eq!(ResourceType::from_value(2).unwrap(), ResourceType::Document);
    }
}
