//! This module contains the outcomes of stepping the parser, and the tagged
//! union of read results that they are materialised from.

use crate::{
    data::bit_string::BitString,
    error::TlbStructuralError,
    expr::Expr,
    parse::frame::TlbStack,
    schema::label::{AtomicLabel, CellSchema, FieldWidth},
    scope::{CellAddress, FieldKey, FieldPath},
};

/// A memory field for which the data constraint has been emitted.
pub type DataMarker = (CellAddress, FieldKey);

/// Where the bits of one piece of a read came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadResult {
    /// The bits are a known constant, such as a switch discriminant.
    Constant(BitString),

    /// The bits belong to a schema field, and only the bits `slice` (an
    /// offset and a length) of it were read if present.
    SchemaField {
        key:   FieldPath,
        label: AtomicLabel,
        width: FieldWidth,
        slice: Option<(u32, u32)>,
    },

    /// The bits have no inferred shape and are taken from the raw data.
    RawData { width: Expr },
}

/// A piece of a read, located at the data position at which it starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Piece {
    pub result:   ReadResult,
    pub position: Expr,
}

/// A successful data read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadOutcome {
    /// The parsing state after the read.
    pub stack: TlbStack,

    /// The value that was read.
    pub value: Expr,

    /// The constraints tying the value to the cell's data, which must hold on
    /// the path that takes this outcome.
    pub constraints: Vec<Expr>,

    /// The memory fields whose data constraints are contained in
    /// `constraints`.
    pub markers: Vec<DataMarker>,
}

/// The outcome of a data read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    Read(ReadOutcome),
    Error(TlbStructuralError),
}

impl StepOutcome {
    /// Gets the successful read, if this is one.
    #[must_use]
    pub fn as_read(&self) -> Option<&ReadOutcome> {
        match self {
            Self::Read(read) => Some(read),
            Self::Error(_) => None,
        }
    }

    /// Gets the structural error, if this is one.
    #[must_use]
    pub fn as_error(&self) -> Option<&TlbStructuralError> {
        match self {
            Self::Read(_) => None,
            Self::Error(error) => Some(error),
        }
    }
}

/// The outcome of a reference load.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RefOutcome {
    /// A reference to a cell of schema `child` was loaded.
    Loaded { stack: TlbStack, child: CellSchema },

    Error(TlbStructuralError),
}

/// The outcome of checking that a slice has been fully read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EndOutcome {
    Finished,
    Error(TlbStructuralError),
}
