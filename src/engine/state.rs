//! This module contains the per-state data that the engine keeps alongside
//! each of the host's symbolic states.

use crate::{
    builder::StructureBuilder,
    data::cow::{CowMap, CowSet, CowVec},
    error::engine::{Error, Result},
    expr::Expr,
    mapper::AddressMapper,
    parse::{frame::TlbStack, outcome::DataMarker},
    schema::Schema,
    scope::{BuilderId, CellAddress, SliceId},
};

/// Everything the engine knows within one symbolic state.
///
/// All of the contents are copy-on-write, so the host clones the state
/// whenever it forks and the clones evolve independently.
#[derive(Clone, Debug, Default)]
pub struct TlbState {
    pub(crate) schema:      Schema,
    pub(crate) mapper:      AddressMapper,
    pub(crate) stacks:      CowMap<SliceId, TlbStack>,
    pub(crate) builders:    CowMap<BuilderId, StructureBuilder>,
    pub(crate) markers:     CowSet<DataMarker>,
    pub(crate) constraints: CowVec<Expr>,
    pub(crate) constructed: CowSet<CellAddress>,
}

impl TlbState {
    /// Creates the state at the start of execution, in which cells are
    /// interpreted with `schema`.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Gets the schema, including any labels constructed by builders in this
    /// state.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Gets the mapping from addresses to candidate schemas.
    #[must_use]
    pub fn mapper(&self) -> &AddressMapper {
        &self.mapper
    }

    /// Gets the parsing state of `slice`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no parse of `slice` has been started.
    pub fn stack(&self, slice: SliceId) -> Result<&TlbStack> {
        self.stacks.get(&slice).ok_or(Error::NoSuchSlice { slice })
    }

    /// Gets the stores made to `builder`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` has not been created.
    pub fn builder(&self, builder: BuilderId) -> Result<&StructureBuilder> {
        self.builders
            .get(&builder)
            .ok_or(Error::NoSuchBuilder { builder })
    }

    /// Gets the memory fields whose data constraints have been emitted.
    #[must_use]
    pub fn markers(&self) -> &CowSet<DataMarker> {
        &self.markers
    }

    /// Gets the structural constraints accumulated so far, which the host
    /// must assert.
    #[must_use]
    pub fn constraints(&self) -> &[Expr] {
        self.constraints.as_slice()
    }

    /// Checks if the cell at `address` was assembled by a builder.
    #[must_use]
    pub fn is_constructed(&self, address: CellAddress) -> bool {
        self.constructed.contains(&address)
    }

    pub(crate) fn builder_mut(&mut self, builder: BuilderId) -> Result<&mut StructureBuilder> {
        self.builders
            .get_mut(&builder)
            .ok_or(Error::NoSuchBuilder { builder })
    }
}
