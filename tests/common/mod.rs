//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.
//!
//! The tests play the part of the host executor, keeping a [`Path`] per
//! symbolic state and forking it once per outcome of every step.

#![cfg(test)]

use anyhow::anyhow;
use tlb_inference::{
    data::bit_string::BitString,
    expr::Expr,
    mapper::LabelInfo,
    parse::{EndOutcome, ReadKind, RefOutcome, SliceCursor, StepOutcome},
    schema::{label::CellSchema, Schema},
    scope::{concolic::ConcolicScope, fork::fork, CellAddress, ExecutionScope, SliceId},
    Config,
    TlbEngine,
    TlbState,
};

/// A single path of execution, holding everything the host keeps per state.
#[derive(Clone, Debug)]
pub struct Path {
    pub engine: TlbEngine,
    pub state:  TlbState,
    pub scope:  ConcolicScope,
}

#[allow(unused)] // Not every test uses every helper
impl Path {
    /// Creates the initial path of an execution over `schema`.
    pub fn new(schema: Schema, config: Config) -> Self {
        Self {
            engine: TlbEngine::new(config),
            state:  TlbState::new(schema),
            scope:  ConcolicScope::new(),
        }
    }

    /// Allocates an input cell holding the binary string `data` and the
    /// references `refs`.
    pub fn cell(&mut self, data: &str, refs: &[CellAddress]) -> anyhow::Result<CellAddress> {
        let bits = bits(data)?;
        let address = self.scope.allocate_cell();
        self.scope.seed_cell(address, &bits, refs);
        Ok(address)
    }

    /// Declares the cell at `address` to have schema `cell` and asserts the
    /// structural constraints that follow from it.
    pub fn declare(&mut self, address: CellAddress, cell: CellSchema) -> anyhow::Result<()> {
        self.engine
            .declare_cell(&mut self.state, address, LabelInfo::single(cell));
        let constraints =
            self.engine
                .initialize_children(&mut self.state, &mut self.scope, address)?;
        for constraint in &constraints {
            self.scope.assert(constraint);
        }
        Ok(())
    }

    /// Starts parsing `address` as `slice`, returning one path per candidate
    /// schema of the cell.
    pub fn begin(&self, address: CellAddress, slice: SliceId) -> Vec<Path> {
        let stacks = self.engine.begin_parse(&self.state, address);
        fork(&self.scope, stacks)
            .into_iter()
            .map(|(scope, stack)| {
                let mut path = self.with_scope(scope);
                path.engine.commit_stack(&mut path.state, slice, stack);
                path
            })
            .collect()
    }

    /// Reads a value of `kind` from `slice`, committing each successful read
    /// to its own path.
    pub fn read(
        &mut self,
        slice: SliceId,
        cursor: &SliceCursor,
        kind: &ReadKind,
    ) -> anyhow::Result<Vec<(Path, StepOutcome)>> {
        let outcomes = self
            .engine
            .read(&self.state, &mut self.scope, slice, cursor, kind)?;
        Ok(fork(&self.scope, outcomes)
            .into_iter()
            .map(|(scope, outcome)| {
                let mut path = self.with_scope(scope);
                if let StepOutcome::Read(read) = &outcome {
                    path.engine.commit_read(&mut path.state, slice, read);
                }
                (path, outcome)
            })
            .collect())
    }

    /// Loads the next reference from `slice`, committing each successful load
    /// to its own path.
    pub fn load_ref(
        &mut self,
        slice: SliceId,
        cursor: &SliceCursor,
    ) -> anyhow::Result<Vec<(Path, RefOutcome)>> {
        let address = self.state.stack(slice)?.address();
        let index = cursor
            .ref_position
            .as_u32()
            .ok_or_else(|| anyhow!("The reference position must be concrete"))?;
        let child_address = self.scope.ref_address(address, index);
        let outcomes = self
            .engine
            .load_ref(&self.state, &mut self.scope, slice, cursor)?;
        Ok(fork(&self.scope, outcomes)
            .into_iter()
            .map(|(scope, outcome)| {
                let mut path = self.with_scope(scope);
                if let RefOutcome::Loaded { stack, child } = &outcome {
                    path.engine.commit_ref(
                        &mut path.state,
                        slice,
                        stack.clone(),
                        child_address,
                        *child,
                    );
                }
                (path, outcome)
            })
            .collect())
    }

    /// Checks that `slice` has been read completely.
    pub fn end(
        &mut self,
        slice: SliceId,
        cursor: &SliceCursor,
    ) -> anyhow::Result<Vec<(Path, EndOutcome)>> {
        let outcomes = self
            .engine
            .end_parse(&self.state, &mut self.scope, slice, cursor)?;
        Ok(fork(&self.scope, outcomes)
            .into_iter()
            .map(|(scope, outcome)| (self.with_scope(scope), outcome))
            .collect())
    }

    /// Evaluates the bit-vector `expr` in the model of this path.
    pub fn value(&self, expr: &Expr) -> anyhow::Result<BitString> {
        self.scope
            .evaluate_in_model(expr)
            .and_then(|value| value.as_bits().cloned())
            .ok_or_else(|| anyhow!("{expr} has no value in the model"))
    }

    fn with_scope(&self, scope: ConcolicScope) -> Path {
        Path {
            engine: self.engine.clone(),
            state:  self.state.clone(),
            scope,
        }
    }
}

/// Parses `text` as a string of `0` and `1` characters.
pub fn bits(text: &str) -> anyhow::Result<BitString> {
    BitString::from_binary(text).ok_or_else(|| anyhow!("{text} is not a binary string"))
}

/// Expects exactly one outcome, returning it.
#[allow(unused)] // It is actually
pub fn only<T>(mut outcomes: Vec<(Path, T)>) -> anyhow::Result<(Path, T)> {
    match outcomes.len() {
        1 => Ok(outcomes.remove(0)),
        n => Err(anyhow!("Expected a single outcome but found {n}")),
    }
}

/// Expects exactly one path, returning it.
#[allow(unused)] // It is actually
pub fn only_path(mut paths: Vec<Path>) -> anyhow::Result<Path> {
    match paths.len() {
        1 => Ok(paths.remove(0)),
        n => Err(anyhow!("Expected a single path but found {n}")),
    }
}
