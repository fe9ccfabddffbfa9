//! This module contains the interface through which the host drives the
//! engine.
//!
//! The [`TlbEngine`] itself is stateless apart from its [`Config`]. All of the
//! knowledge gathered during execution lives in a [`TlbState`] that the host
//! keeps alongside each of its symbolic states and clones whenever it forks.
//!
//! # Steps and Commits
//!
//! Operations that may branch come in two halves. The step (such as
//! [`TlbEngine::read`]) looks at the state and returns guarded outcomes
//! without changing anything. The host forks once per outcome, asserts the
//! guard in the fork, and then commits the outcome (such as with
//! [`TlbEngine::commit_read`]) to the fork's copy of the state.

pub mod state;

use tracing::debug;

pub use state::TlbState;

use crate::{
    builder::StructureBuilder,
    constant::{
        DEFAULT_LENGTH_UPPER_BOUND,
        DEFAULT_MAX_CELL_DEPTH,
        DEFAULT_MAX_TLB_DEPTH,
        DEFAULT_STRICT_TLB_CHECKS,
    },
    data::bit_string::BitString,
    error::engine::{Error, Result},
    expr::Expr,
    mapper::{LabelInfo, MapperContext},
    parse::{
        self,
        EndOutcome,
        ReadKind,
        ReadOutcome,
        RefOutcome,
        SliceCursor,
        StepContext,
        StepOutcome,
        TlbStack,
    },
    resolver::{ResolvedCell, Resolver},
    schema::label::{CellSchema, TlbLabel},
    scope::{BuilderId, CellAddress, ExecutionScope, Guarded, SliceId},
};

/// The configuration for the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of composite-label expansions allowed when parsing a single
    /// cell, including the expansion of the cell's root label.
    ///
    /// Once the budget is spent the remainder of the cell is treated as
    /// shapeless data.
    ///
    /// Defaults to [`DEFAULT_MAX_TLB_DEPTH`].
    pub max_tlb_depth: u32,

    /// The number of levels of references through which child-constraint
    /// generation recurses.
    ///
    /// Defaults to [`DEFAULT_MAX_CELL_DEPTH`].
    pub max_cell_depth: u32,

    /// The static upper bound on the value of every symbolic field width.
    ///
    /// Defaults to [`DEFAULT_LENGTH_UPPER_BOUND`].
    pub length_upper_bound: u32,

    /// Whether structural mismatches on cells assembled during execution are
    /// reported.
    ///
    /// When disabled, reads from such cells that do not match their
    /// reconstructed schema fall back to reading shapeless data instead.
    ///
    /// Defaults to [`DEFAULT_STRICT_TLB_CHECKS`].
    pub strict_tlb_checks: bool,
}

impl Config {
    /// Sets the `max_tlb_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_tlb_depth(mut self, value: u32) -> Self {
        self.max_tlb_depth = value;
        self
    }

    /// Sets the `max_cell_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_cell_depth(mut self, value: u32) -> Self {
        self.max_cell_depth = value;
        self
    }

    /// Sets the `length_upper_bound` config parameter to `value`.
    #[must_use]
    pub fn with_length_upper_bound(mut self, value: u32) -> Self {
        self.length_upper_bound = value;
        self
    }

    /// Sets the `strict_tlb_checks` config parameter to `value`.
    #[must_use]
    pub fn with_strict_tlb_checks(mut self, value: bool) -> Self {
        self.strict_tlb_checks = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let max_tlb_depth = DEFAULT_MAX_TLB_DEPTH;
        let max_cell_depth = DEFAULT_MAX_CELL_DEPTH;
        let length_upper_bound = DEFAULT_LENGTH_UPPER_BOUND;
        let strict_tlb_checks = DEFAULT_STRICT_TLB_CHECKS;
        Self {
            max_tlb_depth,
            max_cell_depth,
            length_upper_bound,
            strict_tlb_checks,
        }
    }
}

/// The engine, which matches the reads and stores of the host against the
/// schemas inferred for its cells.
#[derive(Clone, Debug, Default)]
pub struct TlbEngine {
    config: Config,
}

impl TlbEngine {
    /// Creates an engine with the provided `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Gets the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Records `info` as the candidate schemas of the input cell at `address`,
    /// returning `false` if candidates were already known.
    pub fn declare_cell(
        &self,
        state: &mut TlbState,
        address: CellAddress,
        info: LabelInfo,
    ) -> bool {
        state.mapper.register(address, info)
    }

    /// Starts parsing the cell at `address`, returning one initial parsing
    /// state for each candidate schema of the cell under its guard.
    #[must_use]
    pub fn begin_parse(&self, state: &TlbState, address: CellAddress) -> Vec<Guarded<TlbStack>> {
        let info = state.mapper.label_info_or_unknown(address);
        info.candidates()
            .iter()
            .map(|(cell, guard)| {
                let stack = TlbStack::new(address, &state.schema, *cell, self.config.max_tlb_depth);
                Guarded::new(guard.clone(), stack)
            })
            .collect()
    }

    /// Associates `stack` with `slice`, replacing whatever was there.
    pub fn commit_stack(&self, state: &mut TlbState, slice: SliceId, stack: TlbStack) {
        state.stacks.insert(slice, stack);
    }

    /// Reads a value of `kind` from `slice`, whose read cursor is at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no parse of `slice` has been started or if the read
    /// is invalid.
    pub fn read(
        &self,
        state: &TlbState,
        scope: &mut dyn ExecutionScope,
        slice: SliceId,
        cursor: &SliceCursor,
        kind: &ReadKind,
    ) -> Result<Vec<Guarded<StepOutcome>>> {
        let stack = state.stack(slice)?;
        let mut ctx = self.step_context(state, scope);
        let outcomes = parse::step(&mut ctx, stack, cursor, kind)?;
        self.tolerate(
            state,
            stack.address(),
            outcomes,
            |outcome| matches!(outcome, StepOutcome::Error(_)),
            |unknown| parse::step(&mut ctx, unknown, cursor, kind),
        )
    }

    /// Commits a successful read to `slice`.
    pub fn commit_read(&self, state: &mut TlbState, slice: SliceId, outcome: &ReadOutcome) {
        for marker in &outcome.markers {
            state.markers.insert(marker.clone());
        }
        state.stacks.insert(slice, outcome.stack.clone());
    }

    /// Loads the next reference from `slice`, whose read cursor is at
    /// `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no parse of `slice` has been started.
    pub fn load_ref(
        &self,
        state: &TlbState,
        scope: &mut dyn ExecutionScope,
        slice: SliceId,
        cursor: &SliceCursor,
    ) -> Result<Vec<Guarded<RefOutcome>>> {
        let stack = state.stack(slice)?;
        let mut ctx = self.step_context(state, scope);
        let outcomes = parse::load_ref(&mut ctx, stack, cursor);
        self.tolerate(
            state,
            stack.address(),
            outcomes,
            |outcome| matches!(outcome, RefOutcome::Error(_)),
            |unknown| Ok(parse::load_ref(&mut ctx, unknown, cursor)),
        )
    }

    /// Commits a successful reference load from `slice`, in which the
    /// reference leads to the cell at `child_address` with schema `child`.
    ///
    /// The child's schema is recorded unless candidates for the child are
    /// already known.
    pub fn commit_ref(
        &self,
        state: &mut TlbState,
        slice: SliceId,
        stack: TlbStack,
        child_address: CellAddress,
        child: CellSchema,
    ) {
        if state.mapper.register(child_address, LabelInfo::single(child)) {
            debug!(
                %slice,
                child = %child_address,
                schema = %child,
                "Registered the schema of a loaded cell"
            );
        }
        state.stacks.insert(slice, stack);
    }

    /// Checks that `slice`, whose read cursor is at `cursor`, has been read
    /// completely.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no parse of `slice` has been started.
    pub fn end_parse(
        &self,
        state: &TlbState,
        scope: &mut dyn ExecutionScope,
        slice: SliceId,
        cursor: &SliceCursor,
    ) -> Result<Vec<Guarded<EndOutcome>>> {
        let stack = state.stack(slice)?;
        let mut ctx = self.step_context(state, scope);
        let outcomes = parse::end(&mut ctx, stack, cursor);
        self.tolerate(
            state,
            stack.address(),
            outcomes,
            |outcome| matches!(outcome, EndOutcome::Error(_)),
            |unknown| Ok(parse::end(&mut ctx, unknown, cursor)),
        )
    }

    /// Generates the structural constraints for the cell at `address` and its
    /// children, adding them to the state's accumulator.
    ///
    /// The new constraints are also returned so that the host can assert
    /// them right away.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the constraints for `address` have already been
    /// generated in this state's lineage.
    pub fn initialize_children(
        &self,
        state: &mut TlbState,
        scope: &mut dyn ExecutionScope,
        address: CellAddress,
    ) -> Result<Vec<Expr>> {
        let mut ctx = MapperContext {
            config: &self.config,
            schema: &state.schema,
            scope,
        };
        let constraints = state
            .mapper
            .initialize_constraints_for_children(&mut ctx, address)?;
        state.constraints.extend(constraints.iter().cloned());
        Ok(constraints)
    }

    /// Replaces the candidate schemas of `address` by `cell`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the schema of `address` is already fixated.
    pub fn retrofit(
        &self,
        state: &mut TlbState,
        address: CellAddress,
        cell: CellSchema,
    ) -> Result<()> {
        state.mapper.retrofit(address, cell)
    }

    /// Creates `builder` with nothing stored to it.
    pub fn new_builder(&self, state: &mut TlbState, builder: BuilderId) {
        state.builders.insert(builder, StructureBuilder::new());
    }

    /// Makes `to` a copy of `from`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `from` does not exist.
    pub fn copy_builder(&self, state: &mut TlbState, from: BuilderId, to: BuilderId) -> Result<()> {
        let copy = state.builder(from)?.clone();
        state.builders.insert(to, copy);
        Ok(())
    }

    /// Stores `value` as a field of `label` to `builder`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` does not exist or if the label cannot be
    /// stored (see [`StructureBuilder::add_tlb_label`]).
    pub fn store_label(
        &self,
        state: &mut TlbState,
        builder: BuilderId,
        label: &TlbLabel,
        value: Expr,
    ) -> Result<()> {
        let TlbState {
            schema, builders, ..
        } = state;
        let target = builders
            .get_mut(&builder)
            .ok_or(Error::NoSuchBuilder { builder })?;
        target.add_tlb_label(schema, label, value)
    }

    /// Stores the raw `bits` to `builder`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` does not exist.
    pub fn store_constant(
        &self,
        state: &mut TlbState,
        builder: BuilderId,
        bits: &BitString,
    ) -> Result<()> {
        state.builder_mut(builder)?.add_constant(bits);
        Ok(())
    }

    /// Stores a reference to a cell of schema `reference` to `builder`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` does not exist.
    pub fn store_ref(
        &self,
        state: &mut TlbState,
        builder: BuilderId,
        reference: CellSchema,
    ) -> Result<()> {
        state.builder_mut(builder)?.add_ref(reference);
        Ok(())
    }

    /// Stores shapeless data to `builder`, which makes the rest of the cell
    /// shapeless.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` does not exist.
    pub fn store_unknown(&self, state: &mut TlbState, builder: BuilderId) -> Result<()> {
        state.builder_mut(builder)?.add_unknown();
        Ok(())
    }

    /// Finishes the cell at `address` assembled by `builder`, returning the
    /// schema reconstructed for it.
    ///
    /// The conditions under which the stores form a valid cell are added to
    /// the state's accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `builder` does not exist or if a schema for
    /// `address` is already fixated, in which case nothing is changed.
    pub fn end_builder(
        &self,
        state: &mut TlbState,
        scope: &mut dyn ExecutionScope,
        builder: BuilderId,
        address: CellAddress,
    ) -> Result<CellSchema> {
        if state.mapper.is_fixated(address) {
            return Err(Error::AddressFixated { address });
        }
        let stores = state.builder(builder)?.clone();
        let built = stores.end(builder, &mut state.schema, scope, address);
        let cell = built.schema();
        if !state.mapper.register(address, LabelInfo::single(cell)) {
            state.mapper.retrofit(address, cell)?;
        }
        state.constraints.extend(built.constraints);
        state.constructed.insert(address);
        Ok(cell)
    }

    /// Resolves the concrete contents of the cell at `address` under the
    /// model of `scope`.
    #[must_use]
    pub fn resolve(
        &self,
        state: &TlbState,
        scope: &mut dyn ExecutionScope,
        address: CellAddress,
    ) -> ResolvedCell {
        let resolver = Resolver {
            config: &self.config,
            schema: &state.schema,
            mapper: &state.mapper,
        };
        resolver.resolve(scope, address)
    }

    fn step_context<'a>(
        &'a self,
        state: &'a TlbState,
        scope: &'a mut dyn ExecutionScope,
    ) -> StepContext<'a> {
        StepContext {
            config: &self.config,
            schema: &state.schema,
            markers: &state.markers,
            scope,
        }
    }

    /// Re-steps the error outcomes of a step on a cell assembled during
    /// execution against shapeless data, if checks are relaxed.
    fn tolerate<T>(
        &self,
        state: &TlbState,
        address: CellAddress,
        outcomes: Vec<Guarded<T>>,
        is_error: impl Fn(&T) -> bool,
        mut retry: impl FnMut(&TlbStack) -> Result<Vec<Guarded<T>>>,
    ) -> Result<Vec<Guarded<T>>> {
        if self.config.strict_tlb_checks || !state.is_constructed(address) {
            return Ok(outcomes);
        }
        let unknown = TlbStack::unknown(address);
        let mut tolerated = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if is_error(&outcome.value) {
                debug!(
                    %address,
                    guard = %outcome.guard,
                    "Ignoring a mismatch on a constructed cell"
                );
                let retried = retry(&unknown)?;
                tolerated.extend(retried.into_iter().map(|o| o.under(&outcome.guard)));
            } else {
                tolerated.push(outcome);
            }
        }
        Ok(tolerated)
    }
}
