//! This module contains errors pertaining to the construction and loading of
//! TL-B schemas.

use thiserror::Error;

pub use crate::error::container::{DeclarationError, Errors};

/// Errors that occur while building a [`crate::schema::Schema`], either
/// programmatically or from a JSON description.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The label {name:?} has been declared more than once")]
    DuplicateLabel { name: String },

    #[error("The label {name:?} is referenced but never declared")]
    UndefinedLabel { name: String },

    #[error("The structure of label {name:?} has already been assigned")]
    AlreadyDefined { name: String },

    #[error("The label {name:?} was declared but its structure was never assigned")]
    NeverDefined { name: String },

    #[error("A switch must have a non-zero discriminant width")]
    ZeroSwitchSize,

    #[error("A switch must have at least one variant")]
    EmptySwitch,

    #[error("The switch key {key:?} does not have the declared width {switch_size}")]
    InvalidSwitchKey { key: String, switch_size: u32 },

    #[error("The switch key {key:?} occurs more than once")]
    DuplicateSwitchKey { key: String },

    #[error("The field {field:?} is not an earlier integer field usable as a type argument")]
    InvalidTypeArgument { field: String },

    #[error("The label {name:?} expects {expected} type arguments but was given {actual}")]
    ArityMismatch { name: String, expected: usize, actual: usize },

    #[error("The label {name:?} ends in an unknown tail but is used as a nested field")]
    UnknownBelowRoot { name: String },

    #[error("Atomic fields must have a non-zero width, but {name:?} has width zero")]
    ZeroWidth { name: String },

    #[error("The field {name:?} has width {bits} but at most {limit} bits are allowed")]
    TooWide { name: String, bits: u32, limit: u32 },

    #[error("The schema description is not valid JSON: {message}")]
    Json { message: String },
}

/// The result type for methods that may have schema errors.
pub type Result<T> = std::result::Result<T, Error>;
