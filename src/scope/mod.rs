//! This module contains the interface through which the engine talks to the
//! host's symbolic execution scope.
//!
//! The engine never calls a solver and never forks by itself. Instead it asks
//! the scope for the contents of memory fields, and returns guarded outcomes
//! that the host materialises into forked states (see [`fork::fork`]).

pub mod concolic;
pub mod fork;

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use itertools::Itertools;

use crate::{
    expr::{eval::Value, Expr, Sort},
    schema::structure::StructureId,
};

/// The address of a cell in the host's memory model.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CellAddress(pub u64);

impl Display for CellAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// The identity of a slice (a read cursor over a cell) in the host.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SliceId(pub u64);

impl Display for SliceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slice#{}", self.0)
    }
}

/// The identity of a builder (a write cursor for a new cell) in the host.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BuilderId(pub u64);

impl Display for BuilderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "builder#{}", self.0)
    }
}

/// The sequence of structure nodes that leads to a field through nested
/// composite labels.
///
/// Each composite expansion appends the identifier of the node that expanded
/// it, and the field itself is identified by appending its own node. As node
/// identifiers are unique, a path identifies a field uniquely within a cell
/// even when the same label occurs at several nesting levels.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FieldPath {
    nodes: Rc<[StructureId]>,
}

impl FieldPath {
    /// The empty path, used for the root label of a cell.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates the path that extends `self` by `node`.
    #[must_use]
    pub fn child(&self, node: StructureId) -> Self {
        let nodes = self.nodes.iter().copied().chain([node]).collect();
        Self { nodes }
    }

    /// Gets the nodes along the path.
    #[must_use]
    pub fn nodes(&self) -> &[StructureId] {
        &self.nodes
    }

    /// Gets the number of nodes along the path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Checks if this is the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.nodes.iter().join("/"))
    }
}

/// The key of a memory field of a cell.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FieldKey {
    /// The raw data of the cell.
    Data,

    /// The number of data bits in the cell.
    DataLength,

    /// The number of references in the cell.
    RefsLength,

    /// The value of the schema field at the path.
    Tlb(FieldPath),

    /// The index of the chosen variant of the switch at the path.
    SwitchChoice(FieldPath),
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::DataLength => write!(f, "data_len"),
            Self::RefsLength => write!(f, "refs_len"),
            Self::Tlb(path) => write!(f, "tlb[{path}]"),
            Self::SwitchChoice(path) => write!(f, "choice[{path}]"),
        }
    }
}

/// The result of asserting a condition in a scope.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

/// A value that is only valid on paths where `guard` holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Guarded<T> {
    pub guard: Expr,
    pub value: T,
}

impl<T> Guarded<T> {
    /// Creates a new guarded value.
    #[must_use]
    pub fn new(guard: Expr, value: T) -> Self {
        Self { guard, value }
    }

    /// Creates a value that holds on every path.
    #[must_use]
    pub fn always(value: T) -> Self {
        Self::new(Expr::truth(), value)
    }

    /// Strengthens the guard by conjoining `condition`.
    #[must_use]
    pub fn under(self, condition: &Expr) -> Self {
        let guard = Expr::and([condition.clone(), self.guard]);
        Self { guard, ..self }
    }

    /// Transforms the guarded value, keeping the guard.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        Guarded {
            guard: self.guard,
            value: f(self.value),
        }
    }
}

/// The primitives that the engine requires of the host's execution scope.
pub trait ExecutionScope {
    /// Asserts `condition` on the current path.
    fn assert(&mut self, condition: &Expr) -> SatResult;

    /// Checks whether `condition` is satisfiable on the current path, returning
    /// [`None`] if that cannot be decided.
    fn check_sat(&mut self, condition: &Expr) -> Option<bool>;

    /// Reads the memory field `key` of the cell at `address`.
    ///
    /// A field that has never been written reads as a fresh symbol of the
    /// provided `sort`, and reading the same field again yields the same
    /// term.
    fn read_field(&mut self, address: CellAddress, key: &FieldKey, sort: Sort) -> Expr;

    /// Writes `value` to the memory field `key` of the cell at `address` on
    /// the paths where `guard` holds.
    fn write_field(
        &mut self,
        address: CellAddress,
        key: FieldKey,
        sort: Sort,
        value: Expr,
        guard: &Expr,
    );

    /// Gets the address of the cell referenced at `index` by the cell at
    /// `address`.
    fn ref_address(&mut self, address: CellAddress, index: u32) -> CellAddress;

    /// Evaluates `expr` in the current model, if one exists.
    fn evaluate_in_model(&self, expr: &Expr) -> Option<Value>;
}
