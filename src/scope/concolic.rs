//! This module contains [`ConcolicScope`], an execution scope that decides
//! conditions by evaluation against a concrete model rather than by calling a
//! solver.
//!
//! The model starts out holding the concrete contents of the input cells.
//! Asserted equalities between an unassigned variable and a term that already
//! has a value extend the model, which is enough to give values to every field
//! and switch choice the engine derives from concrete data. Assertions that
//! cannot yet be decided are kept and re-checked whenever the model grows.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    constant::{MAX_DATA_BITS, REFS_BITS, SIZE_BITS},
    data::bit_string::BitString,
    expr::{
        eval::{evaluate, evaluate_bool, Assignment, Value},
        Expr,
        ExprData,
        Sort,
    },
    scope::{CellAddress, ExecutionScope, FieldKey, SatResult},
};

/// An execution scope backed by a concrete, incrementally-extended model.
#[derive(Clone, Debug, Default)]
pub struct ConcolicScope {
    model:        Assignment,
    memory:       HashMap<(CellAddress, FieldKey), Expr>,
    refs:         HashMap<(CellAddress, u32), CellAddress>,
    next_address: u64,
    pending:      Vec<Expr>,
}

impl ConcolicScope {
    /// Creates a scope with an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the address of a new cell.
    pub fn allocate_cell(&mut self) -> CellAddress {
        let address = CellAddress(self.next_address);
        self.next_address += 1;
        address
    }

    /// Gives the cell at `address` the concrete contents `data` and `refs`.
    ///
    /// Data longer than a cell can hold is truncated.
    pub fn seed_cell(&mut self, address: CellAddress, data: &BitString, refs: &[CellAddress]) {
        let length = data.len().min(MAX_DATA_BITS);
        let padded = data
            .slice(0, length)
            .concat(&BitString::zeros(MAX_DATA_BITS - length));
        self.model
            .set(variable_name(address, &FieldKey::Data), Value::Bits(padded));
        self.model.set(
            variable_name(address, &FieldKey::DataLength),
            Value::Bits(BitString::from_u128(u128::from(length), SIZE_BITS)),
        );
        let ref_count = u32::try_from(refs.len()).unwrap_or(u32::MAX);
        self.model.set(
            variable_name(address, &FieldKey::RefsLength),
            Value::Bits(BitString::from_u128(u128::from(ref_count), REFS_BITS)),
        );
        for (index, child) in (0u32..).zip(refs) {
            self.refs.insert((address, index), *child);
        }
    }

    /// Gets the current model.
    #[must_use]
    pub fn model(&self) -> &Assignment {
        &self.model
    }

    /// Gets the number of asserted conditions that could not yet be decided.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Extends the model with the bindings implied by `condition`, returning
    /// `true` if anything was learned.
    fn propagate(&mut self, condition: &Expr) -> bool {
        match condition.data() {
            ExprData::And(items) => {
                let mut learned = false;
                for item in items {
                    learned |= self.propagate(item);
                }
                learned
            }
            ExprData::Or(items) => {
                // An implication learns its conclusion once its premise holds.
                let undecided: Vec<_> = items
                    .iter()
                    .filter(|i| evaluate_bool(i, &self.model) != Some(false))
                    .collect();
                match undecided.as_slice() {
                    [only] if evaluate_bool(only, &self.model).is_none() => {
                        let only = (*only).clone();
                        self.propagate(&only)
                    }
                    _ => false,
                }
            }
            ExprData::Eq(left, right) => self.bind(left, right) || self.bind(right, left),
            ExprData::Var { name, sort: Sort::Bool } => self.assign(name, Value::Bool(true)),
            ExprData::Not(inner) => match inner.data() {
                ExprData::Var { name, sort: Sort::Bool } => self.assign(name, Value::Bool(false)),
                _ => false,
            },
            _ => false,
        }
    }

    fn bind(&mut self, target: &Expr, source: &Expr) -> bool {
        let ExprData::Var { name, .. } = target.data() else {
            return false;
        };
        match evaluate(source, &self.model) {
            Some(value) => self.assign(name, value),
            None => false,
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        if self.model.get(name).is_some() {
            return false;
        }
        trace!(name, ?value, "Extended concolic model");
        self.model.set(name, value);
        true
    }

    /// Re-checks the pending assertions until the model stops growing.
    fn saturate(&mut self) -> SatResult {
        loop {
            let mut learned = false;
            let pending = std::mem::take(&mut self.pending);
            for condition in pending {
                match evaluate_bool(&condition, &self.model) {
                    Some(true) => {}
                    Some(false) => return SatResult::Unsat,
                    None => {
                        learned |= self.propagate(&condition);
                        self.pending.push(condition);
                    }
                }
            }
            if !learned {
                return SatResult::Sat;
            }
        }
    }
}

fn variable_name(address: CellAddress, key: &FieldKey) -> String {
    format!("{address}.{key}")
}

impl ExecutionScope for ConcolicScope {
    fn assert(&mut self, condition: &Expr) -> SatResult {
        self.pending.push(condition.clone());
        if self.saturate() == SatResult::Unsat {
            return SatResult::Unsat;
        }
        match evaluate_bool(condition, &self.model) {
            Some(true) => SatResult::Sat,
            Some(false) => SatResult::Unsat,
            None => SatResult::Unknown,
        }
    }

    fn check_sat(&mut self, condition: &Expr) -> Option<bool> {
        evaluate_bool(condition, &self.model)
    }

    fn read_field(&mut self, address: CellAddress, key: &FieldKey, sort: Sort) -> Expr {
        self.memory
            .entry((address, key.clone()))
            .or_insert_with(|| Expr::var(variable_name(address, key), sort))
            .clone()
    }

    fn write_field(
        &mut self,
        address: CellAddress,
        key: FieldKey,
        sort: Sort,
        value: Expr,
        guard: &Expr,
    ) {
        let previous = self.read_field(address, &key, sort);
        let updated = Expr::ite(guard.clone(), value, previous);
        self.memory.insert((address, key), updated);
    }

    fn ref_address(&mut self, address: CellAddress, index: u32) -> CellAddress {
        if let Some(child) = self.refs.get(&(address, index)) {
            return *child;
        }
        let child = self.allocate_cell();
        self.refs.insert((address, index), child);
        child
    }

    fn evaluate_in_model(&self, expr: &Expr) -> Option<Value> {
        evaluate(expr, &self.model)
    }
}
