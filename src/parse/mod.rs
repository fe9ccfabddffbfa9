//! This module contains the incremental parser that matches reads from a
//! slice against the schema inferred for the slice's cell.
//!
//! # The Stack
//!
//! The parsing state of a slice is a [`TlbStack`] of frames mirroring a
//! depth-first walk of the schema. Expanding a composite label pushes a frame
//! for its body on top of a frame for whatever follows it, so the stack never
//! holds more than one frame per active expansion. Every expansion spends one
//! unit of a depth budget, and when the budget runs out the remainder of the
//! cell is treated as shapeless data. This guarantees that stepping terminates
//! on arbitrarily recursive schemas.
//!
//! # Stepping
//!
//! Each operation takes a stack and returns guarded outcomes, one per way that
//! the request can be resolved. Guards of the outcomes of a single step are
//! mutually exclusive and exhaustive. The host turns each outcome into a
//! separate branch of execution and commits the stack that it carries.

pub mod frame;
pub mod model;
pub mod outcome;
pub mod read;
pub mod refs;

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use tracing::{debug, trace};

pub use frame::TlbStack;
pub use outcome::{EndOutcome, ReadOutcome, RefOutcome, StepOutcome};
pub use read::step;
pub use refs::{end, load_ref};

use crate::{
    constant::{CANONICAL_INT_BITS, STD_ADDRESS_BITS},
    data::cow::CowSet,
    engine::Config,
    expr::{
        numeric::{self, CANONICAL_SORT, DATA_SORT, REFS_SORT, SIZE_SORT},
        Expr,
    },
    parse::{
        frame::{Frame, FrameEnv},
        outcome::DataMarker,
    },
    schema::{
        label::LabelId,
        structure::{Structure, StructureId, TypeArg},
        Schema,
    },
    scope::{CellAddress, ExecutionScope, FieldKey},
};

/// The kinds of read that the host can request from a slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadKind {
    /// An integer of the provided (data-position-sorted) width.
    Integer { width: Expr, signed: bool },

    /// A string of the provided non-zero number of bits.
    BitArray { width: u32 },

    /// A single bit read as a boolean, as done for the constructor of an
    /// optional value.
    MaybeConstructorBit,

    /// A standard internal address.
    StdAddress,

    /// A coin amount, which is read as a four-bit length followed by an
    /// unsigned integer of that many bytes.
    Coins,
}

impl ReadKind {
    /// A signed integer of `bits` bits.
    #[must_use]
    pub fn int(bits: u32) -> Self {
        Self::Integer {
            width:  numeric::size(bits),
            signed: true,
        }
    }

    /// An unsigned integer of `bits` bits.
    #[must_use]
    pub fn uint(bits: u32) -> Self {
        Self::Integer {
            width:  numeric::size(bits),
            signed: false,
        }
    }

    /// A string of `bits` bits.
    #[must_use]
    pub fn bits(bits: u32) -> Self {
        Self::BitArray { width: bits }
    }
}

impl Display for ReadKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer { width, signed } => write!(f, "{}", Request::integer(width, *signed)),
            Self::BitArray { width } => write!(f, "bits{width}"),
            Self::MaybeConstructorBit => write!(f, "bit"),
            Self::StdAddress => write!(f, "address"),
            Self::Coins => write!(f, "coins"),
        }
    }
}

/// A single primitive read, which every [`ReadKind`] decomposes into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Request {
    Integer { width: Expr, signed: bool },
    Bits(u32),
    Bit,
    Address,
}

impl Request {
    fn integer(width: &Expr, signed: bool) -> Self {
        Self::Integer {
            width: width.clone(),
            signed,
        }
    }

    /// Gets the number of data bits the request consumes.
    pub(crate) fn width(&self) -> Expr {
        match self {
            Self::Integer { width, .. } => width.clone(),
            Self::Bits(width) => numeric::size(*width),
            Self::Bit => numeric::size(1),
            Self::Address => numeric::size(STD_ADDRESS_BITS),
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer { width, signed } => {
                let sign = if *signed { "int" } else { "uint" };
                match width.as_u32() {
                    Some(bits) => write!(f, "{sign}{bits}"),
                    None => write!(f, "({sign} {width})"),
                }
            }
            Self::Bits(width) => write!(f, "bits{width}"),
            Self::Bit => write!(f, "bit"),
            Self::Address => write!(f, "address"),
        }
    }
}

/// The position of a slice's read cursor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SliceCursor {
    /// The number of data bits already read, as a data position.
    pub data_position: Expr,

    /// The number of references already read, as a reference position.
    pub ref_position: Expr,
}

impl SliceCursor {
    /// Creates a cursor at the provided positions.
    #[must_use]
    pub fn new(data_position: Expr, ref_position: Expr) -> Self {
        Self {
            data_position,
            ref_position,
        }
    }

    /// Creates a cursor at concrete positions.
    #[must_use]
    pub fn at(data_bits: u32, refs: u32) -> Self {
        Self::new(numeric::size(data_bits), numeric::refs(refs))
    }

    /// A cursor at the start of a cell.
    #[must_use]
    pub fn start() -> Self {
        Self::at(0, 0)
    }
}

/// Everything that stepping the parser needs besides the stack itself.
pub struct StepContext<'a> {
    pub config:  &'a Config,
    pub schema:  &'a Schema,
    pub markers: &'a CowSet<DataMarker>,
    pub scope:   &'a mut dyn ExecutionScope,
}

impl<'a> StepContext<'a> {
    /// Reads the raw data of the cell at `address`.
    pub(crate) fn data(&mut self, address: CellAddress) -> Expr {
        self.scope.read_field(address, &FieldKey::Data, DATA_SORT)
    }

    /// Reads the data length of the cell at `address`.
    pub(crate) fn data_length(&mut self, address: CellAddress) -> Expr {
        self.scope.read_field(address, &FieldKey::DataLength, SIZE_SORT)
    }

    /// Reads the reference count of the cell at `address`.
    pub(crate) fn refs_length(&mut self, address: CellAddress) -> Expr {
        self.scope.read_field(address, &FieldKey::RefsLength, REFS_SORT)
    }

    /// Checks if the data constraint for `marker` has been emitted, either
    /// already committed or in `local`.
    pub(crate) fn is_marked(&self, marker: &DataMarker, local: &[DataMarker]) -> bool {
        self.markers.contains(marker) || local.contains(marker)
    }

    /// Resolves the values of `type_args` within `env` for the cell at
    /// `address`.
    ///
    /// Parameters that the environment does not provide resolve to zero.
    pub(crate) fn resolve_args(
        &mut self,
        address: CellAddress,
        env: &FrameEnv,
        type_args: &[TypeArg],
    ) -> Vec<Expr> {
        resolve_args(self.scope, address, env, type_args)
    }

    /// Expands the composite label `label`, found at node `id` within `env`
    /// and followed by `rest`, on top of `stack`.
    ///
    /// If the depth budget is exhausted or the label does not exist, the whole
    /// stack collapses into shapeless data instead.
    pub(crate) fn expand(
        &mut self,
        stack: &mut TlbStack,
        expansion: Expansion<'_>,
    ) -> Option<LabelId> {
        expand(self.schema, self.scope, stack, expansion)
    }
}

/// A composite field that is about to be expanded.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Expansion<'s> {
    pub id:        StructureId,
    pub label:     LabelId,
    pub type_args: &'s [TypeArg],
    pub rest:      &'s Rc<Structure>,
    pub env:       &'s Rc<FrameEnv>,
}

pub(crate) fn resolve_args(
    scope: &mut dyn ExecutionScope,
    address: CellAddress,
    env: &FrameEnv,
    type_args: &[TypeArg],
) -> Vec<Expr> {
    type_args
        .iter()
        .map(|arg| match arg {
            TypeArg::Field(id) => {
                let key = FieldKey::Tlb(env.path.child(*id));
                scope.read_field(address, &key, CANONICAL_SORT)
            }
            TypeArg::Param(index) => env
                .args
                .get(*index)
                .cloned()
                .unwrap_or_else(|| Expr::bv(0, CANONICAL_INT_BITS)),
            TypeArg::Const(value) => Expr::bv(u128::from(*value), CANONICAL_INT_BITS),
        })
        .collect()
}

/// Expands a composite field on top of `stack`, returning the label whose body
/// was pushed or [`None`] if the stack collapsed into shapeless data.
pub(crate) fn expand(
    schema: &Schema,
    scope: &mut dyn ExecutionScope,
    stack: &mut TlbStack,
    expansion: Expansion<'_>,
) -> Option<LabelId> {
    let Expansion {
        id,
        label,
        type_args,
        rest,
        env,
    } = expansion;
    let composite = match schema.get(label) {
        Some(composite) if env.depth > 0 => composite.clone(),
        _ => {
            debug!(address = %stack.address(), %label, "Out of depth, reading as data");
            stack.collapse_to_unknown();
            return None;
        }
    };
    trace!(address = %stack.address(), %label, depth = env.depth, "Expanding composite");

    let args = resolve_args(scope, stack.address(), env, type_args);
    let inner = Rc::new(FrameEnv {
        path:  env.path.child(id),
        args:  Rc::from(args),
        depth: env.depth - 1,
    });
    stack.push(Frame::structure(rest.clone(), env.clone()));
    stack.push(Frame::structure(composite.structure.clone(), inner));
    Some(label)
}
