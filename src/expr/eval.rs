//! This module contains the concrete evaluation of terms against a model.

use std::{cmp::Ordering, collections::HashMap, rc::Rc};

use crate::{
    data::bit_string::BitString,
    expr::{BvOp, CmpOp, Expr, ExprData, Sort},
};

/// A concrete value of some sort.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    Bool(bool),
    Bits(BitString),
}

impl Value {
    /// Gets the truth value if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Bits(_) => None,
        }
    }

    /// Gets the bits if this is a bit-vector.
    #[must_use]
    pub fn as_bits(&self) -> Option<&BitString> {
        match self {
            Value::Bool(_) => None,
            Value::Bits(bits) => Some(bits),
        }
    }

    /// Gets the sort of the value.
    #[must_use]
    pub fn sort(&self) -> Sort {
        match self {
            Value::Bool(_) => Sort::Bool,
            Value::Bits(bits) => Sort::BitVec(bits.len()),
        }
    }

    /// Gets the zero value of `sort`.
    #[must_use]
    pub fn zero(sort: Sort) -> Self {
        match sort {
            Sort::Bool => Value::Bool(false),
            Sort::BitVec(width) => Value::Bits(BitString::zeros(width)),
        }
    }

    /// Converts the value into a constant term.
    #[must_use]
    pub fn into_expr(self) -> Expr {
        match self {
            Value::Bool(b) => Expr::bool(b),
            Value::Bits(bits) => Expr::bits(bits),
        }
    }
}

/// A source of values for the free variables of a term.
pub trait Model {
    /// Looks up the value of the variable `name` of sort `sort`, returning
    /// [`None`] if the model does not constrain it.
    fn lookup(&self, name: &str, sort: Sort) -> Option<Value>;
}

/// A model given by an explicit assignment of values to variables.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    values: HashMap<Rc<str>, Value>,
}

impl Assignment {
    /// Creates an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to the variable `name`, returning the previous value.
    pub fn set(&mut self, name: impl Into<Rc<str>>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    /// Gets the value assigned to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Gets the number of assigned variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checks if no variables are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Model for Assignment {
    fn lookup(&self, name: &str, sort: Sort) -> Option<Value> {
        self.values.get(name).filter(|v| v.sort() == sort).cloned()
    }
}

/// A model that completes another by assigning zero to every variable it
/// leaves unconstrained.
#[derive(Clone, Copy, Debug)]
pub struct Completed<'a, M: ?Sized> {
    inner: &'a M,
}

impl<'a, M: Model + ?Sized> Completed<'a, M> {
    /// Wraps `inner` so that every variable has a value.
    #[must_use]
    pub fn new(inner: &'a M) -> Self {
        Self { inner }
    }
}

impl<'a, M: Model + ?Sized> Model for Completed<'a, M> {
    fn lookup(&self, name: &str, sort: Sort) -> Option<Value> {
        Some(self.inner.lookup(name, sort).unwrap_or_else(|| Value::zero(sort)))
    }
}

/// Evaluates `expr` under `model`.
///
/// Returns [`None`] if the value depends on a variable the model does not
/// constrain. Short-circuiting operators only require the operands they
/// actually inspect to have values.
#[must_use]
pub fn evaluate(expr: &Expr, model: &dyn Model) -> Option<Value> {
    let value = match expr.data() {
        ExprData::Bool(b) => Value::Bool(*b),
        ExprData::BitVec(bits) => Value::Bits(bits.clone()),
        ExprData::Var { name, sort } => model.lookup(name, *sort)?,
        ExprData::Not(value) => Value::Bool(!evaluate_bool(value, model)?),
        ExprData::And(items) => {
            let mut unknown = false;
            for item in items {
                match evaluate_bool(item, model) {
                    Some(false) => return Some(Value::Bool(false)),
                    Some(true) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                return None;
            }
            Value::Bool(true)
        }
        ExprData::Or(items) => {
            let mut unknown = false;
            for item in items {
                match evaluate_bool(item, model) {
                    Some(true) => return Some(Value::Bool(true)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            if unknown {
                return None;
            }
            Value::Bool(false)
        }
        ExprData::Eq(left, right) => Value::Bool(evaluate(left, model)? == evaluate(right, model)?),
        ExprData::Ite {
            cond,
            then,
            otherwise,
        } => {
            if evaluate_bool(cond, model)? {
                evaluate(then, model)?
            } else {
                evaluate(otherwise, model)?
            }
        }
        ExprData::Extract { value, high, low } => {
            Value::Bits(evaluate_bits(value, model)?.extract(*high, *low))
        }
        ExprData::Concat { high, low } => {
            Value::Bits(evaluate_bits(high, model)?.concat(&evaluate_bits(low, model)?))
        }
        ExprData::ZeroExtend { value, by } => {
            Value::Bits(evaluate_bits(value, model)?.zero_extend(*by))
        }
        ExprData::SignExtend { value, by } => {
            Value::Bits(evaluate_bits(value, model)?.sign_extend(*by))
        }
        ExprData::Binary { op, left, right } => {
            let left = evaluate_bits(left, model)?;
            let right = evaluate_bits(right, model)?;
            Value::Bits(apply_binary(*op, &left, &right))
        }
        ExprData::Compare { op, left, right } => {
            let left = evaluate_bits(left, model)?;
            let right = evaluate_bits(right, model)?;
            Value::Bool(apply_compare(*op, &left, &right))
        }
    };

    Some(value)
}

/// Evaluates a boolean `expr` under `model`.
#[must_use]
pub fn evaluate_bool(expr: &Expr, model: &dyn Model) -> Option<bool> {
    evaluate(expr, model)?.as_bool()
}

/// Evaluates a bit-vector `expr` under `model`.
#[must_use]
pub fn evaluate_bits(expr: &Expr, model: &dyn Model) -> Option<BitString> {
    match evaluate(expr, model)? {
        Value::Bits(bits) => Some(bits),
        Value::Bool(_) => None,
    }
}

/// Evaluates `expr` under `model`, treating every unconstrained variable as
/// zero so that a value always exists.
#[must_use]
pub fn evaluate_completed(expr: &Expr, model: &dyn Model) -> Value {
    let completed = Completed::new(model);
    evaluate(expr, &completed).unwrap_or_else(|| Value::zero(expr.sort()))
}

/// Applies the binary operation `op` to two concrete operands of equal width.
#[must_use]
pub fn apply_binary(op: BvOp, left: &BitString, right: &BitString) -> BitString {
    match op {
        BvOp::Add => left.wrapping_add(right),
        BvOp::Sub => left.wrapping_sub(right),
        BvOp::Mul => left.wrapping_mul(right),
        BvOp::Shl => left.shl(right.to_usize_saturating()),
        BvOp::Lshr => left.lshr(right.to_usize_saturating()),
        BvOp::Ashr => left.ashr(right.to_usize_saturating()),
    }
}

/// Applies the comparison `op` to two concrete operands of equal width.
#[must_use]
pub fn apply_compare(op: CmpOp, left: &BitString, right: &BitString) -> bool {
    match op {
        CmpOp::Ult => left.unsigned_cmp(right) == Ordering::Less,
        CmpOp::Ule => left.unsigned_cmp(right) != Ordering::Greater,
        CmpOp::Slt => left.signed_cmp(right) == Ordering::Less,
        CmpOp::Sle => left.signed_cmp(right) != Ordering::Greater,
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        expr::{
            eval::{evaluate, evaluate_bool, evaluate_completed, Assignment, Value},
            Expr,
            Sort,
        },
    };

    #[test]
    fn evaluates_under_an_assignment() {
        let x = Expr::var("x", Sort::BitVec(8));
        let mut model = Assignment::new();
        model.set("x", Value::Bits(BitString::from_u128(200, 8)));

        let sum = Expr::add(x.clone(), Expr::bv(100, 8));
        assert_eq!(
            evaluate(&sum, &model),
            Some(Value::Bits(BitString::from_u128(44, 8)))
        );
        assert_eq!(evaluate_bool(&Expr::slt(x, Expr::bv(0, 8)), &model), Some(true));
    }

    #[test]
    fn unassigned_variables_have_no_value() {
        let x = Expr::var("x", Sort::BitVec(8));
        let model = Assignment::new();
        assert_eq!(evaluate(&x, &model), None);
        assert_eq!(
            evaluate_completed(&x, &model),
            Value::Bits(BitString::zeros(8))
        );
    }

    #[test]
    fn conjunctions_short_circuit_on_known_falsity() {
        let p = Expr::var("p", Sort::Bool);
        let q = Expr::var("q", Sort::Bool);
        let mut model = Assignment::new();
        model.set("q", Value::Bool(false));
        assert_eq!(evaluate_bool(&Expr::and([p.clone(), q.clone()]), &model), Some(false));
        assert_eq!(evaluate_bool(&Expr::or([p, q]), &model), None);
    }

    #[test]
    fn ignores_assignments_of_the_wrong_sort() {
        let x = Expr::var("x", Sort::BitVec(8));
        let mut model = Assignment::new();
        model.set("x", Value::Bool(true));
        assert_eq!(evaluate(&x, &model), None);
    }
}
