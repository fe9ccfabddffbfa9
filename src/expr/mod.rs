//! This module contains the symbolic term language used for guards, field
//! values and structural constraints.
//!
//! Terms are immutable and reference counted, so cloning one is cheap and
//! clones can be shared freely between forked states. All of the constructors
//! on [`Expr`] perform local simplification, folding constant operands away
//! where possible. This keeps the terms produced for fully-concrete cells
//! concrete themselves.

pub mod eval;
pub mod numeric;

use std::{
    collections::HashSet,
    fmt::{Debug, Display, Formatter},
    rc::Rc,
};

use itertools::Itertools;

use crate::data::bit_string::BitString;

/// The sort (type) of a term.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Boolean truth values.
    Bool,

    /// Bit-vectors of the contained width, which is always non-zero.
    BitVec(u32),
}

impl Sort {
    /// Gets the width of a bit-vector sort, or [`None`] for booleans.
    #[must_use]
    pub fn width(&self) -> Option<u32> {
        match self {
            Sort::Bool => None,
            Sort::BitVec(width) => Some(*width),
        }
    }
}

impl Display for Sort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::BitVec(width) => write!(f, "BV{width}"),
        }
    }
}

/// Binary bit-vector operations producing a bit-vector of the operands' width.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BvOp {
    Add,
    Sub,
    Mul,
    Shl,
    Lshr,
    Ashr,
}

/// Binary bit-vector comparisons producing a boolean.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CmpOp {
    Ult,
    Ule,
    Slt,
    Sle,
}

/// The nodes of a term.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ExprData {
    /// A boolean constant.
    Bool(bool),

    /// A bit-vector constant.
    BitVec(BitString),

    /// A named free variable of the given sort.
    Var { name: Rc<str>, sort: Sort },

    /// Boolean negation.
    Not(Expr),

    /// Boolean conjunction of all the operands.
    And(Vec<Expr>),

    /// Boolean disjunction of all the operands.
    Or(Vec<Expr>),

    /// Equality between two terms of the same sort.
    Eq(Expr, Expr),

    /// If-then-else.
    Ite { cond: Expr, then: Expr, otherwise: Expr },

    /// Bits `high` to `low` of `value`, where bit zero is least significant.
    Extract { value: Expr, high: u32, low: u32 },

    /// `high` followed by `low`.
    Concat { high: Expr, low: Expr },

    /// Zero extension by `by` bits.
    ZeroExtend { value: Expr, by: u32 },

    /// Sign extension by `by` bits.
    SignExtend { value: Expr, by: u32 },

    /// A binary bit-vector operation.
    Binary { op: BvOp, left: Expr, right: Expr },

    /// A binary bit-vector comparison.
    Compare { op: CmpOp, left: Expr, right: Expr },
}

#[derive(Debug, Eq, Hash, PartialEq)]
struct Node {
    sort: Sort,
    data: ExprData,
}

/// A symbolic term.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Expr {
    node: Rc<Node>,
}

impl Expr {
    fn new(sort: Sort, data: ExprData) -> Self {
        let node = Rc::new(Node { sort, data });
        Self { node }
    }

    /// Gets the node data of this term.
    #[must_use]
    pub fn data(&self) -> &ExprData {
        &self.node.data
    }

    /// Gets the sort of this term.
    #[must_use]
    pub fn sort(&self) -> Sort {
        self.node.sort
    }

    /// Gets the width of this term if it is a bit-vector.
    #[must_use]
    pub fn width(&self) -> Option<u32> {
        self.sort().width()
    }

    /// Gets the width of this term, treating booleans as having no width.
    fn bv_width(&self) -> u32 {
        self.width().unwrap_or(0)
    }

    /// Gets the constant bits of this term if it is a bit-vector constant.
    #[must_use]
    pub fn as_bits(&self) -> Option<&BitString> {
        match self.data() {
            ExprData::BitVec(bits) => Some(bits),
            _ => None,
        }
    }

    /// Gets the value of this term as an unsigned number if it is a small
    /// enough bit-vector constant.
    #[must_use]
    pub fn as_u128(&self) -> Option<u128> {
        self.as_bits().and_then(BitString::to_u128)
    }

    /// Gets the value of this term as a `u32` if it is a small enough
    /// bit-vector constant.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.as_u128().and_then(|v| u32::try_from(v).ok())
    }

    /// Gets the constant truth value of this term if it is a boolean constant.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.data() {
            ExprData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Checks if the term is the constant `true`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    /// Checks if the term is the constant `false`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.as_bool() == Some(false)
    }

    /// Checks if the term contains no free variables.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.data(), ExprData::Bool(_) | ExprData::BitVec(_))
    }

    /// Collects the free variables of this term, each reported once.
    #[must_use]
    pub fn variables(&self) -> Vec<(Rc<str>, Sort)> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut queue = vec![self.clone()];
        while let Some(expr) = queue.pop() {
            if let ExprData::Var { name, sort } = expr.data() {
                if seen.insert(name.clone()) {
                    result.push((name.clone(), *sort));
                }
            }
            queue.extend(expr.children());
        }
        result
    }

    /// Gets the direct sub-terms of this term.
    #[must_use]
    pub fn children(&self) -> Vec<Expr> {
        match self.data() {
            ExprData::Bool(_) | ExprData::BitVec(_) | ExprData::Var { .. } => vec![],
            ExprData::Not(value)
            | ExprData::Extract { value, .. }
            | ExprData::ZeroExtend { value, .. }
            | ExprData::SignExtend { value, .. } => vec![value.clone()],
            ExprData::And(items) | ExprData::Or(items) => items.clone(),
            ExprData::Eq(left, right)
            | ExprData::Binary { left, right, .. }
            | ExprData::Compare { left, right, .. } => vec![left.clone(), right.clone()],
            ExprData::Concat { high, low } => vec![high.clone(), low.clone()],
            ExprData::Ite {
                cond,
                then,
                otherwise,
            } => vec![cond.clone(), then.clone(), otherwise.clone()],
        }
    }

    /// The boolean constant `value`.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::new(Sort::Bool, ExprData::Bool(value))
    }

    /// The boolean constant `true`.
    #[must_use]
    pub fn truth() -> Self {
        Self::bool(true)
    }

    /// The boolean constant `false`.
    #[must_use]
    pub fn falsity() -> Self {
        Self::bool(false)
    }

    /// A bit-vector constant holding `bits`.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is empty, as zero-width bit-vectors do not exist. This
    /// is a programmer bug.
    #[must_use]
    pub fn bits(bits: BitString) -> Self {
        assert!(!bits.is_empty(), "Bit-vector constants must be non-empty");
        Self::new(Sort::BitVec(bits.len()), ExprData::BitVec(bits))
    }

    /// A bit-vector constant of `width` bits holding `value`.
    #[must_use]
    pub fn bv(value: u128, width: u32) -> Self {
        Self::bits(BitString::from_u128(value, width))
    }

    /// A bit-vector constant of `width` bits holding the two's complement
    /// encoding of `value`.
    #[must_use]
    pub fn bv_signed(value: i128, width: u32) -> Self {
        Self::bits(BitString::from_i128(value, width))
    }

    /// A free variable called `name` of the given `sort`.
    #[must_use]
    pub fn var(name: impl Into<Rc<str>>, sort: Sort) -> Self {
        let name = name.into();
        Self::new(sort, ExprData::Var { name, sort })
    }

    /// Boolean negation.
    #[must_use]
    pub fn not(value: Expr) -> Self {
        match value.data() {
            ExprData::Bool(b) => Self::bool(!b),
            ExprData::Not(inner) => inner.clone(),
            _ => Self::new(Sort::Bool, ExprData::Not(value)),
        }
    }

    /// Boolean conjunction of all `items`, which is `true` if there are none.
    #[must_use]
    pub fn and(items: impl IntoIterator<Item = Expr>) -> Self {
        let mut operands = Vec::new();
        for item in items {
            match item.data() {
                ExprData::Bool(true) => {}
                ExprData::Bool(false) => return Self::falsity(),
                ExprData::And(inner) => operands.extend(inner.iter().cloned()),
                _ => operands.push(item),
            }
        }
        let mut operands: Vec<_> = operands.into_iter().unique().collect();
        match operands.len() {
            0 => Self::truth(),
            1 => operands.remove(0),
            _ => Self::new(Sort::Bool, ExprData::And(operands)),
        }
    }

    /// Boolean disjunction of all `items`, which is `false` if there are none.
    #[must_use]
    pub fn or(items: impl IntoIterator<Item = Expr>) -> Self {
        let mut operands = Vec::new();
        for item in items {
            match item.data() {
                ExprData::Bool(false) => {}
                ExprData::Bool(true) => return Self::truth(),
                ExprData::Or(inner) => operands.extend(inner.iter().cloned()),
                _ => operands.push(item),
            }
        }
        let mut operands: Vec<_> = operands.into_iter().unique().collect();
        match operands.len() {
            0 => Self::falsity(),
            1 => operands.remove(0),
            _ => Self::new(Sort::Bool, ExprData::Or(operands)),
        }
    }

    /// Boolean implication from `premise` to `conclusion`.
    #[must_use]
    pub fn implies(premise: Expr, conclusion: Expr) -> Self {
        Self::or([Self::not(premise), conclusion])
    }

    /// Equality between `left` and `right`, which must have the same sort.
    #[must_use]
    pub fn equal(left: Expr, right: Expr) -> Self {
        if left == right {
            return Self::truth();
        }
        match (left.data(), right.data()) {
            (ExprData::Bool(a), ExprData::Bool(b)) => Self::bool(a == b),
            (ExprData::BitVec(a), ExprData::BitVec(b)) => Self::bool(a == b),
            (ExprData::Bool(true), _) => right,
            (_, ExprData::Bool(true)) => left,
            (ExprData::Bool(false), _) => Self::not(right),
            (_, ExprData::Bool(false)) => Self::not(left),
            _ => Self::new(Sort::Bool, ExprData::Eq(left, right)),
        }
    }

    /// If `cond` then `then` else `otherwise`.
    #[must_use]
    pub fn ite(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        match cond.as_bool() {
            Some(true) => then,
            Some(false) => otherwise,
            None if then == otherwise => then,
            None => Self::new(
                then.sort(),
                ExprData::Ite {
                    cond,
                    then,
                    otherwise,
                },
            ),
        }
    }

    /// Bits `high` down to `low` (inclusive) of `value`, with bit zero being
    /// the least significant.
    #[must_use]
    pub fn extract(value: Expr, high: u32, low: u32) -> Self {
        let width = value.bv_width();
        if low == 0 && high + 1 == width {
            return value;
        }
        match value.data() {
            ExprData::BitVec(bits) => Self::bits(bits.extract(high, low)),
            ExprData::Extract {
                value: inner,
                low: inner_low,
                ..
            } => Self::extract(inner.clone(), high + inner_low, low + inner_low),
            ExprData::ZeroExtend { value: inner, .. } if high < inner.bv_width() => {
                Self::extract(inner.clone(), high, low)
            }
            _ => Self::new(Sort::BitVec(high - low + 1), ExprData::Extract { value, high, low }),
        }
    }

    /// `high` followed by `low`.
    #[must_use]
    pub fn concat(high: Expr, low: Expr) -> Self {
        let width = high.bv_width() + low.bv_width();
        match (high.data(), low.data()) {
            (ExprData::BitVec(a), ExprData::BitVec(b)) => Self::bits(a.concat(b)),
            _ => Self::new(Sort::BitVec(width), ExprData::Concat { high, low }),
        }
    }

    /// Zero extension of `value` by `by` bits.
    #[must_use]
    pub fn zero_extend(value: Expr, by: u32) -> Self {
        if by == 0 {
            return value;
        }
        let width = value.bv_width() + by;
        match value.data() {
            ExprData::BitVec(bits) => Self::bits(bits.zero_extend(by)),
            _ => Self::new(Sort::BitVec(width), ExprData::ZeroExtend { value, by }),
        }
    }

    /// Sign extension of `value` by `by` bits.
    #[must_use]
    pub fn sign_extend(value: Expr, by: u32) -> Self {
        if by == 0 {
            return value;
        }
        let width = value.bv_width() + by;
        match value.data() {
            ExprData::BitVec(bits) => Self::bits(bits.sign_extend(by)),
            _ => Self::new(Sort::BitVec(width), ExprData::SignExtend { value, by }),
        }
    }

    /// Changes the width of `value` to `width`, zero-extending or keeping only
    /// the least significant bits.
    #[must_use]
    pub fn resize(value: Expr, width: u32) -> Self {
        let current = value.bv_width();
        if current < width {
            Self::zero_extend(value, width - current)
        } else if current > width {
            Self::extract(value, width - 1, 0)
        } else {
            value
        }
    }

    /// Changes the width of `value` to `width`, sign-extending or keeping only
    /// the least significant bits.
    #[must_use]
    pub fn resize_signed(value: Expr, width: u32) -> Self {
        let current = value.bv_width();
        if current < width {
            Self::sign_extend(value, width - current)
        } else {
            Self::resize(value, width)
        }
    }

    fn binary(op: BvOp, left: Expr, right: Expr) -> Self {
        if let (Some(a), Some(b)) = (left.as_bits(), right.as_bits()) {
            return Self::bits(eval::apply_binary(op, a, b));
        }
        let right_zero = right.as_bits().is_some_and(BitString::is_zero);
        let left_zero = left.as_bits().is_some_and(BitString::is_zero);
        match op {
            BvOp::Add if right_zero => return left,
            BvOp::Add if left_zero => return right,
            BvOp::Sub | BvOp::Shl | BvOp::Lshr | BvOp::Ashr if right_zero => return left,
            BvOp::Mul if left_zero || right_zero => {
                return Self::bits(BitString::zeros(left.bv_width()))
            }
            _ => {}
        }
        Self::new(left.sort(), ExprData::Binary { op, left, right })
    }

    /// Addition modulo the width.
    #[must_use]
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BvOp::Add, left, right)
    }

    /// Subtraction modulo the width.
    #[must_use]
    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(BvOp::Sub, left, right)
    }

    /// Multiplication modulo the width.
    #[must_use]
    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(BvOp::Mul, left, right)
    }

    /// Logical left shift of `value` by `amount`.
    #[must_use]
    pub fn shl(value: Expr, amount: Expr) -> Self {
        Self::binary(BvOp::Shl, value, amount)
    }

    /// Logical right shift of `value` by `amount`.
    #[must_use]
    pub fn lshr(value: Expr, amount: Expr) -> Self {
        Self::binary(BvOp::Lshr, value, amount)
    }

    /// Arithmetic right shift of `value` by `amount`.
    #[must_use]
    pub fn ashr(value: Expr, amount: Expr) -> Self {
        Self::binary(BvOp::Ashr, value, amount)
    }

    fn compare(op: CmpOp, left: Expr, right: Expr) -> Self {
        if let (Some(a), Some(b)) = (left.as_bits(), right.as_bits()) {
            return Self::bool(eval::apply_compare(op, a, b));
        }
        if left == right {
            return Self::bool(matches!(op, CmpOp::Ule | CmpOp::Sle));
        }
        Self::new(Sort::Bool, ExprData::Compare { op, left, right })
    }

    /// Unsigned less-than.
    #[must_use]
    pub fn ult(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Ult, left, right)
    }

    /// Unsigned less-than-or-equal.
    #[must_use]
    pub fn ule(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Ule, left, right)
    }

    /// Unsigned greater-than.
    #[must_use]
    pub fn ugt(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Ult, right, left)
    }

    /// Unsigned greater-than-or-equal.
    #[must_use]
    pub fn uge(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Ule, right, left)
    }

    /// Signed less-than.
    #[must_use]
    pub fn slt(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Slt, left, right)
    }

    /// Signed less-than-or-equal.
    #[must_use]
    pub fn sle(left: Expr, right: Expr) -> Self {
        Self::compare(CmpOp::Sle, left, right)
    }
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Terms are printed as s-expressions in the style of SMT-LIB.
impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.data() {
            ExprData::Bool(b) => write!(f, "{b}"),
            ExprData::BitVec(bits) => write!(f, "{bits}"),
            ExprData::Var { name, .. } => write!(f, "{name}"),
            ExprData::Not(value) => write!(f, "(not {value})"),
            ExprData::And(items) => write!(f, "(and {})", items.iter().join(" ")),
            ExprData::Or(items) => write!(f, "(or {})", items.iter().join(" ")),
            ExprData::Eq(left, right) => write!(f, "(= {left} {right})"),
            ExprData::Ite {
                cond,
                then,
                otherwise,
            } => write!(f, "(ite {cond} {then} {otherwise})"),
            ExprData::Extract { value, high, low } => {
                write!(f, "((extract {high} {low}) {value})")
            }
            ExprData::Concat { high, low } => write!(f, "(concat {high} {low})"),
            ExprData::ZeroExtend { value, by } => write!(f, "((zero_extend {by}) {value})"),
            ExprData::SignExtend { value, by } => write!(f, "((sign_extend {by}) {value})"),
            ExprData::Binary { op, left, right } => {
                let name = match op {
                    BvOp::Add => "bvadd",
                    BvOp::Sub => "bvsub",
                    BvOp::Mul => "bvmul",
                    BvOp::Shl => "bvshl",
                    BvOp::Lshr => "bvlshr",
                    BvOp::Ashr => "bvashr",
                };
                write!(f, "({name} {left} {right})")
            }
            ExprData::Compare { op, left, right } => {
                let name = match op {
                    CmpOp::Ult => "bvult",
                    CmpOp::Ule => "bvule",
                    CmpOp::Slt => "bvslt",
                    CmpOp::Sle => "bvsle",
                };
                write!(f, "({name} {left} {right})")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{Expr, ExprData, Sort};

    fn x() -> Expr {
        Expr::var("x", Sort::BitVec(8))
    }

    #[test]
    fn folds_constant_arithmetic() {
        let sum = Expr::add(Expr::bv(3, 8), Expr::bv(4, 8));
        assert_eq!(sum.as_u128(), Some(7));
        let less = Expr::ult(Expr::bv(3, 8), Expr::bv(4, 8));
        assert!(less.is_true());
    }

    #[test]
    fn simplifies_boolean_structure() {
        let p = Expr::equal(x(), Expr::bv(1, 8));
        assert!(Expr::and([Expr::truth(), Expr::falsity(), p.clone()]).is_false());
        assert_eq!(Expr::and([Expr::truth(), p.clone()]), p);
        assert!(Expr::or([p.clone(), Expr::truth()]).is_true());
        assert_eq!(Expr::not(Expr::not(p.clone())), p);
        assert!(Expr::equal(x(), x()).is_true());
    }

    #[test]
    fn flattens_nested_conjunctions() {
        let p = Expr::equal(x(), Expr::bv(1, 8));
        let q = Expr::equal(x(), Expr::bv(2, 8));
        let nested = Expr::and([p.clone(), Expr::and([q.clone(), p.clone()])]);
        match nested.data() {
            ExprData::And(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected a conjunction, got {other:?}"),
        }
    }

    #[test]
    fn tracks_sorts_through_construction() {
        let wide = Expr::zero_extend(x(), 8);
        assert_eq!(wide.sort(), Sort::BitVec(16));
        assert_eq!(Expr::extract(wide.clone(), 7, 0), x());
        assert_eq!(Expr::concat(x(), x()).sort(), Sort::BitVec(16));
        assert_eq!(Expr::ult(x(), x()).sort(), Sort::Bool);
    }

    #[test]
    fn collects_free_variables_once() {
        let y = Expr::var("y", Sort::Bool);
        let term = Expr::and([y.clone(), Expr::equal(x(), x()), Expr::ite(y, x(), x()).eq_zero()]);
        let names: Vec<_> = term.variables().into_iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names.len(), 2);
    }

    impl Expr {
        fn eq_zero(self) -> Expr {
            let width = self.width().unwrap();
            Expr::equal(self, Expr::bv(0, width))
        }
    }
}
