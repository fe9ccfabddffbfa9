//! This module contains the primary error type for the library's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.
//!
//! All of the errors implement [`std::error::Error`], and hence can be used
//! with [`anyhow::Error`].

pub mod container;
pub mod engine;
pub mod schema;
pub mod structural;

use thiserror::Error;

pub use structural::TlbStructuralError;

/// The interface result type for the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum. Structural parsing
/// errors are deliberately absent, as they are carried as values.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// A single error from building a schema.
    #[error(transparent)]
    Schema(#[from] schema::Error),

    /// Every error found while loading a schema description.
    #[error(transparent)]
    SchemaDescription(#[from] schema::Errors),

    /// Errors from misuse of the engine.
    #[error(transparent)]
    Engine(#[from] engine::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
