//! This module contains errors that signal misuse of the engine's interface by
//! the host.

use thiserror::Error;

use crate::scope::{BuilderId, CellAddress, SliceId};

/// Contract violations detected by the [`crate::engine::TlbEngine`] and the
/// components it drives.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Constraints for the children of {address} have already been generated")]
    ChildrenAlreadyInitialized { address: CellAddress },

    #[error("No parsing stack is associated with {slice}")]
    NoSuchSlice { slice: SliceId },

    #[error("No structure builder is associated with {builder}")]
    NoSuchBuilder { builder: BuilderId },

    #[error("The schema of {address} is fixated and cannot be replaced")]
    AddressFixated { address: CellAddress },

    #[error("The label {label:?} has arity {arity} but builders only accept arity 0")]
    NonZeroArity { label: String, arity: usize },

    #[error("The label {label:?} cannot be stored by a structure builder")]
    UnsupportedBuilderLabel { label: String },

    #[error("The value stored for {label:?} has sort {actual} but {expected} was expected")]
    InitSortMismatch { label: String, expected: String, actual: String },

    #[error("A read of {read} consumes no data, which is not a valid read")]
    ZeroWidthRead { read: String },

    #[error("No composite label with id {id} exists in the schema")]
    NoSuchLabel { id: String },
}

/// The result type for methods that may have engine errors.
pub type Result<T> = std::result::Result<T, Error>;
