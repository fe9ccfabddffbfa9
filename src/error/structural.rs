//! This module contains the structural-parsing errors that arise when a read
//! from a cell does not agree with the schema inferred for that cell.
//!
//! Unlike the other errors in the library, these are never returned through a
//! [`Result`]. They are carried as values inside guarded outcomes so that the
//! host can turn each of them into a separate branch of execution.

use thiserror::Error;

/// The taxonomy of structural mismatches between a requested read and the
/// schema of the cell being read.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TlbStructuralError {
    #[error("Read of {read} does not match the expected field type {expected}")]
    UnexpectedType { expected: String, read: String },

    #[error("Switch with a discriminant of {switch_size} bits cannot be read as {read}")]
    SwitchUnexpectedType { switch_size: u32, read: String },

    #[error("Read of {requested} bits exceeds the {available} bits left in the switch")]
    OutOfSwitchBounds { requested: u32, available: u32 },

    #[error("The {switch_size}-bit discriminant matches none of the switch keys")]
    UnknownSwitchKey { switch_size: u32 },

    #[error("Unexpected end of data")]
    UnexpectedEndOfData,

    #[error("Unexpected extra data")]
    UnexpectedExtraData,

    #[error("Unexpected reference load")]
    UnexpectedRef,
}

impl TlbStructuralError {
    /// Constructs a type mismatch between the `expected` field type and the
    /// `read` that was requested.
    #[must_use]
    pub fn unexpected_type(expected: impl ToString, read: impl ToString) -> Self {
        Self::UnexpectedType {
            expected: expected.to_string(),
            read:     read.to_string(),
        }
    }

    /// Constructs a mismatch between a switch of `switch_size` bits and a
    /// `read` that cannot consume it.
    #[must_use]
    pub fn switch_unexpected_type(switch_size: u32, read: impl ToString) -> Self {
        Self::SwitchUnexpectedType {
            switch_size,
            read: read.to_string(),
        }
    }
}
