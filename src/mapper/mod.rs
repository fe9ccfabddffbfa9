//! This module contains the mapping from cell addresses to the schemas that
//! those cells may have, and the generation of the structural constraints
//! that keep each cell's memory consistent with its schema.
//!
//! # Candidates
//!
//! A cell whose schema is not known for certain is described by a
//! [`LabelInfo`]: a set of candidate [`CellSchema`]s, each with the guard under
//! which the cell has that schema. Exactly one guard holds in every admissible
//! model, though the guards need not be syntactically disjoint.
//!
//! # Constraint Flavours
//!
//! Constraints come in three flavours that are generated at different times:
//!
//! - **Size** constraints fix the data length and reference count of a cell,
//!   and are generated when the constraints for a cell's children are
//!   initialized, as reads depend on them.
//! - **Field** constraints bound the fields of symbolic width, and are
//!   generated alongside the size constraints.
//! - **Data** constraints tie the value of a field to the bits of the cell
//!   that hold it, and are generated lazily on the first read of the field
//!   (see [`crate::parse`]).

pub mod children;
pub mod constraints;

use tracing::debug;

use crate::{
    data::cow::{CowMap, CowSet},
    engine::Config,
    error::engine::{Error, Result},
    expr::Expr,
    schema::{label::CellSchema, Schema},
    scope::{CellAddress, ExecutionScope},
};

/// The candidate schemas of a cell, each with the guard under which the cell
/// has it.
///
/// Candidates are kept in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelInfo {
    candidates: Vec<(CellSchema, Expr)>,
}

impl LabelInfo {
    /// Creates a label info with no candidates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a label info whose only candidate is `cell`, which always
    /// holds.
    #[must_use]
    pub fn single(cell: CellSchema) -> Self {
        let mut info = Self::new();
        info.add(cell, Expr::truth());
        info
    }

    /// Adds `cell` as a candidate under `guard`.
    ///
    /// If `cell` is already a candidate, its guard is weakened to also cover
    /// `guard`. Candidates whose guard is trivially false are not added.
    pub fn add(&mut self, cell: CellSchema, guard: Expr) {
        if guard.is_false() {
            return;
        }
        match self.candidates.iter_mut().find(|(c, _)| *c == cell) {
            Some((_, existing)) => *existing = Expr::or([existing.clone(), guard]),
            None => self.candidates.push((cell, guard)),
        }
    }

    /// Gets the candidates in insertion order.
    #[must_use]
    pub fn candidates(&self) -> &[(CellSchema, Expr)] {
        &self.candidates
    }

    /// Gets the guard of `cell`, if it is a candidate.
    #[must_use]
    pub fn guard_of(&self, cell: CellSchema) -> Option<&Expr> {
        self.candidates
            .iter()
            .find(|(c, _)| *c == cell)
            .map(|(_, guard)| guard)
    }

    /// Gets the number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Checks if there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Adds [`CellSchema::Unknown`] as the candidate for every model in which
    /// no other candidate holds.
    pub fn complete(&mut self) {
        let covered = Expr::or(self.candidates.iter().map(|(_, guard)| guard.clone()));
        self.add(CellSchema::Unknown, Expr::not(covered));
    }
}

/// The per-state association between cell addresses and their candidate
/// schemas.
///
/// All of the contents are copy-on-write, so cloning the mapper when a state
/// forks is cheap and the clones never observe each other's changes.
#[derive(Clone, Debug, Default)]
pub struct AddressMapper {
    labels:      CowMap<CellAddress, LabelInfo>,
    fixated:     CowSet<CellAddress>,
    initialized: CowSet<CellAddress>,
}

impl AddressMapper {
    /// Creates a mapper that knows nothing about any address.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the candidate schemas of the cell at `address`, if any are known.
    ///
    /// Callers should treat an address with no label info as
    /// [`CellSchema::Unknown`].
    #[must_use]
    pub fn label_info(&self, address: CellAddress) -> Option<&LabelInfo> {
        self.labels.get(&address)
    }

    /// Gets the candidate schemas of the cell at `address`, defaulting to an
    /// unknown cell.
    #[must_use]
    pub fn label_info_or_unknown(&self, address: CellAddress) -> LabelInfo {
        self.label_info(address)
            .cloned()
            .unwrap_or_else(|| LabelInfo::single(CellSchema::Unknown))
    }

    /// Records `info` as the candidates of `address` if nothing is known about
    /// it yet, returning `true` if it was recorded.
    pub fn register(&mut self, address: CellAddress, info: LabelInfo) -> bool {
        if self.labels.contains_key(&address) || info.is_empty() {
            return false;
        }
        self.labels.insert(address, info);
        true
    }

    /// Replaces the candidates of `address` by the single schema `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the schema of `address` is already fixated.
    pub fn retrofit(&mut self, address: CellAddress, cell: CellSchema) -> Result<()> {
        if self.is_fixated(address) {
            return Err(Error::AddressFixated { address });
        }
        debug!(%address, %cell, "Retro-fitted the schema of a cell");
        self.labels.insert(address, LabelInfo::single(cell));
        Ok(())
    }

    /// Prevents any further changes to the candidates of `address`.
    pub fn fixate(&mut self, address: CellAddress) {
        if self.fixated.insert(address) {
            debug!(%address, "Fixated the schema of a cell");
        }
    }

    /// Checks if the candidates of `address` can no longer change.
    #[must_use]
    pub fn is_fixated(&self, address: CellAddress) -> bool {
        self.fixated.contains(&address)
    }

    /// Checks if the constraints for the children of `address` have been
    /// generated.
    #[must_use]
    pub fn is_initialized(&self, address: CellAddress) -> bool {
        self.initialized.contains(&address)
    }

    /// Generates the structural constraints of the cell at `address` and,
    /// recursively through its references, of its children.
    ///
    /// The candidates of every child that the schemas of `address` predict are
    /// registered along the way. Recursion stops after
    /// [`Config::max_cell_depth`] levels of references and at children whose
    /// constraints have already been generated.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the constraints for `address` have already been
    /// generated in this state's lineage.
    pub fn initialize_constraints_for_children(
        &mut self,
        ctx: &mut MapperContext<'_>,
        address: CellAddress,
    ) -> Result<Vec<Expr>> {
        if self.is_initialized(address) {
            return Err(Error::ChildrenAlreadyInitialized { address });
        }
        let cell_depth = ctx.config.max_cell_depth;
        let mut constraints = Vec::new();
        self.initialize(ctx, address, cell_depth, &mut constraints);
        Ok(constraints)
    }

    fn initialize(
        &mut self,
        ctx: &mut MapperContext<'_>,
        address: CellAddress,
        cell_depth: u32,
        constraints: &mut Vec<Expr>,
    ) {
        self.initialized.insert(address);
        self.fixate(address);
        let info = self.label_info_or_unknown(address);
        debug!(
            %address,
            candidates = info.len(),
            cell_depth,
            "Generating structural constraints"
        );

        constraints.push(constraints::size_bounds(ctx, address));
        for (cell, guard) in info.candidates() {
            let structural = constraints::structural_constraint(ctx, address, *cell);
            constraints.push(Expr::implies(guard.clone(), structural));
        }

        if cell_depth == 0 {
            return;
        }
        let children = children::child_label_infos(ctx, address, &info);
        for (index, child_info) in children {
            let child = ctx.scope.ref_address(address, index);
            self.register(child, child_info);
            if !self.is_initialized(child) {
                self.initialize(ctx, child, cell_depth - 1, constraints);
            }
        }
    }
}

/// Everything that constraint generation needs besides the mapper itself.
pub struct MapperContext<'a> {
    pub config: &'a Config,
    pub schema: &'a Schema,
    pub scope:  &'a mut dyn ExecutionScope,
}
