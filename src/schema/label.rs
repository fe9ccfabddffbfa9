//! This module contains the labels (types) that schema fields can have.

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    constant::STD_ADDRESS_BITS,
    expr::{
        numeric::{self, CANONICAL_SORT},
        Expr,
        Sort,
    },
    schema::structure::Structure,
};

/// The process-wide pool from which composite label identifiers are drawn.
static LAST_LABEL_ID: AtomicUsize = AtomicUsize::new(0);

/// The identity of a composite label.
///
/// Composite labels are compared by identity rather than by structure, so two
/// labels with the same body are still distinct.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LabelId {
    id: usize,
}

impl LabelId {
    /// Requests a new unique label identifier.
    #[must_use]
    pub fn fresh() -> Self {
        let id = LAST_LABEL_ID.fetch_add(1, Ordering::Relaxed);
        Self { id }
    }
}

impl Display for LabelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.id)
    }
}

/// The label of a field.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TlbLabel {
    /// A primitive with no inner structure.
    Atomic(AtomicLabel),

    /// A reference to a composite label in the schema.
    Composite(LabelId),
}

impl From<AtomicLabel> for TlbLabel {
    fn from(value: AtomicLabel) -> Self {
        Self::Atomic(value)
    }
}

impl From<LabelId> for TlbLabel {
    fn from(value: LabelId) -> Self {
        Self::Composite(value)
    }
}

/// The primitive labels.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AtomicLabel {
    /// An integer of a fixed number of bits.
    Integer { bits: u32, signed: bool },

    /// An integer whose width in bits is given by its single type argument.
    SizedInteger { signed: bool },

    /// An integer whose width is its single type argument multiplied by
    /// `unit_bits`, where arguments above `max_units` count as `max_units`.
    UnitInteger {
        signed:    bool,
        unit_bits: u32,
        max_units: u32,
    },

    /// A string of a fixed number of bits.
    BitArray { bits: u32 },

    /// A standard internal address without anycast.
    StdAddress,
}

impl AtomicLabel {
    /// A signed integer of `bits` bits.
    #[must_use]
    pub fn int(bits: u32) -> Self {
        Self::Integer { bits, signed: true }
    }

    /// An unsigned integer of `bits` bits.
    #[must_use]
    pub fn uint(bits: u32) -> Self {
        Self::Integer {
            bits,
            signed: false,
        }
    }

    /// A string of `bits` bits.
    #[must_use]
    pub fn bits(bits: u32) -> Self {
        Self::BitArray { bits }
    }

    /// Gets the number of type arguments the label takes.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::SizedInteger { .. } | Self::UnitInteger { .. } => 1,
            _ => 0,
        }
    }

    /// Checks if the label is a signed integer.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        match self {
            Self::Integer { signed, .. }
            | Self::SizedInteger { signed }
            | Self::UnitInteger { signed, .. } => *signed,
            Self::BitArray { .. } | Self::StdAddress => false,
        }
    }

    /// Checks if the label is any kind of integer.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Integer { .. } | Self::SizedInteger { .. } | Self::UnitInteger { .. }
        )
    }

    /// Gets the sort of the memory field that holds a value of this label.
    #[must_use]
    pub fn sort(&self) -> Sort {
        match self {
            Self::Integer { .. } | Self::SizedInteger { .. } | Self::UnitInteger { .. } => {
                CANONICAL_SORT
            }
            Self::BitArray { bits } => Sort::BitVec(*bits),
            Self::StdAddress => Sort::BitVec(STD_ADDRESS_BITS),
        }
    }

    /// Computes the width of a field of this label given the values of its
    /// type arguments.
    ///
    /// Missing arguments are treated as zero. Widths that no cell could hold
    /// are clamped to [`numeric::OVERSIZED_WIDTH`].
    #[must_use]
    pub fn width(&self, args: &[Expr]) -> FieldWidth {
        let argument = || {
            args.first()
                .cloned()
                .unwrap_or_else(|| Expr::bv(0, CANONICAL_SORT.width().unwrap_or(1)))
        };
        match self {
            Self::Integer { bits, .. } | Self::BitArray { bits } => FieldWidth::Fixed(*bits),
            Self::StdAddress => FieldWidth::Fixed(STD_ADDRESS_BITS),
            Self::SizedInteger { .. } => {
                let arg = argument();
                match arg.as_u32() {
                    Some(width) => FieldWidth::Fixed(numeric::clamp_width(width)),
                    None if arg.is_constant() => FieldWidth::Fixed(numeric::OVERSIZED_WIDTH),
                    None => FieldWidth::Expr(numeric::to_width(arg)),
                }
            }
            Self::UnitInteger {
                unit_bits,
                max_units,
                ..
            } => {
                let arg = argument();
                let unit_width = |units: u32| {
                    numeric::clamp_width(units.min(*max_units).saturating_mul(*unit_bits))
                };
                if let Some(units) = arg.as_u32() {
                    return FieldWidth::Fixed(unit_width(units));
                }
                if arg.is_constant() {
                    return FieldWidth::Fixed(unit_width(*max_units));
                }
                let arg_width = arg.width().unwrap_or(1);
                let variants = (0..=*max_units)
                    .map(|units| {
                        let guard =
                            Expr::equal(arg.clone(), Expr::bv(u128::from(units), arg_width));
                        (guard, unit_width(units))
                    })
                    .collect();
                FieldWidth::Variants {
                    variants,
                    default: unit_width(*max_units),
                }
            }
        }
    }
}

impl Display for AtomicLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = |signed: bool| if signed { "int" } else { "uint" };
        match self {
            Self::Integer { bits, signed } => write!(f, "{}{bits}", sign(*signed)),
            Self::SizedInteger { signed } => write!(f, "({} n)", sign(*signed)),
            Self::UnitInteger {
                signed,
                unit_bits,
                max_units,
            } => write!(f, "(var_{} {unit_bits}x{max_units})", sign(*signed)),
            Self::BitArray { bits } => write!(f, "bits{bits}"),
            Self::StdAddress => write!(f, "MsgAddressInt"),
        }
    }
}

/// The width of an atomic field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldWidth {
    /// A width known ahead of time.
    Fixed(u32),

    /// A width given directly by a data-position-sorted term.
    Expr(Expr),

    /// A width given by a case split over guards, taking `default` if no guard
    /// holds.
    Variants {
        variants: Vec<(Expr, u32)>,
        default:  u32,
    },
}

impl FieldWidth {
    /// Gets the width if it is fixed.
    #[must_use]
    pub fn as_fixed(&self) -> Option<u32> {
        match self {
            Self::Fixed(width) => Some(*width),
            Self::Expr(expr) => expr.as_u32(),
            Self::Variants { .. } => None,
        }
    }

    /// Checks if the width may be something other than a single constant.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.as_fixed().is_none()
    }

    /// Converts the width into a data-position-sorted term.
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        match self {
            Self::Fixed(width) => numeric::size(*width),
            Self::Expr(expr) => expr.clone(),
            Self::Variants { variants, default } => {
                variants.iter().rev().fold(numeric::size(*default), |acc, (guard, width)| {
                    Expr::ite(guard.clone(), numeric::size(*width), acc)
                })
            }
        }
    }
}

/// The kinds of composite label.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum CompositeKind {
    /// A label declared by a schema description.
    User,

    /// The builtin label for coin amounts.
    Coins,

    /// The builtin label for an optional reference.
    MaybeRef,

    /// A label reconstructed from the stores made to a builder.
    Constructed,
}

/// A named label whose body is a structure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompositeLabel {
    pub id:        LabelId,
    pub name:      Rc<str>,
    pub arity:     usize,
    pub kind:      CompositeKind,
    pub structure: Rc<Structure>,
}

/// The schema of a whole cell.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum CellSchema {
    /// A cell with no known schema.
    Unknown,

    /// A cell whose data is described by the composite label.
    Data(LabelId),

    /// A dictionary cell with keys of the given length.
    Dict { key_length: u32 },
}

impl Display for CellSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Data(id) => write!(f, "Data({id})"),
            Self::Dict { key_length } => write!(f, "Dict({key_length})"),
        }
    }
}
