//! This module contains the numeric conventions shared by the parser, the
//! constraint generator and the builder.
//!
//! Cell data is modelled as a single bit-vector of [`MAX_DATA_BITS`] bits whose
//! first stored bit is the most significant one. Positions and lengths are
//! bit-vectors of [`SIZE_BITS`] bits, and integers are extended to
//! [`CANONICAL_INT_BITS`] bits when read.

use crate::{
    constant::{CANONICAL_INT_BITS, MAX_DATA_BITS, REFS_BITS, SIZE_BITS},
    data::bit_string::BitString,
    expr::{Expr, Sort},
};

/// The sort of cell data.
pub const DATA_SORT: Sort = Sort::BitVec(MAX_DATA_BITS);

/// The sort of data positions and lengths.
pub const SIZE_SORT: Sort = Sort::BitVec(SIZE_BITS);

/// The sort of reference positions and counts.
pub const REFS_SORT: Sort = Sort::BitVec(REFS_BITS);

/// The sort that integer reads produce.
pub const CANONICAL_SORT: Sort = Sort::BitVec(CANONICAL_INT_BITS);

/// The width that field widths too large for any cell are clamped to.
///
/// It exceeds [`MAX_DATA_BITS`] but is small enough that sums of many such
/// widths stay within the data-position sort.
pub const OVERSIZED_WIDTH: u32 = MAX_DATA_BITS + 1;

/// A constant data position or length.
#[must_use]
pub fn size(value: u32) -> Expr {
    Expr::bv(u128::from(value), SIZE_BITS)
}

/// A constant reference position or count.
#[must_use]
pub fn refs(value: u32) -> Expr {
    Expr::bv(u128::from(value), REFS_BITS)
}

/// Converts `value` into a data position, truncating or zero-extending it.
#[must_use]
pub fn to_size(value: Expr) -> Expr {
    Expr::resize(value, SIZE_BITS)
}

/// Clamps a concrete field width to [`OVERSIZED_WIDTH`].
#[must_use]
pub fn clamp_width(width: u32) -> u32 {
    width.min(OVERSIZED_WIDTH)
}

/// Converts the unsigned integer `value` into a field width of the
/// data-position sort.
///
/// Values that do not fit in a cell become [`OVERSIZED_WIDTH`] rather than
/// being truncated, so that bounds on the result still reject them.
#[must_use]
pub fn to_width(value: Expr) -> Expr {
    let value_width = value.width().unwrap_or(0);
    let needed = u32::BITS - MAX_DATA_BITS.leading_zeros();
    if value_width <= needed {
        return Expr::resize(value, SIZE_BITS);
    }
    let fits = Expr::ule(
        value.clone(),
        Expr::bv(u128::from(MAX_DATA_BITS), value_width),
    );
    Expr::ite(
        fits,
        Expr::resize(value, SIZE_BITS),
        size(OVERSIZED_WIDTH),
    )
}

/// Extends the integer `value` to the canonical integer sort, respecting its
/// signedness.
#[must_use]
pub fn canonical(value: Expr, signed: bool) -> Expr {
    if signed {
        Expr::resize_signed(value, CANONICAL_INT_BITS)
    } else {
        Expr::resize(value, CANONICAL_INT_BITS)
    }
}

/// Extracts the `width` bits of `data` that start at the symbolic position
/// `position`.
///
/// # Panics
///
/// Panics if `width` is zero or wider than the data, which is a programmer bug.
#[must_use]
pub fn extract_at(data: &Expr, position: &Expr, width: u32) -> Expr {
    let data_width = data.width().unwrap_or(0);
    assert!(
        width > 0 && width <= data_width,
        "Extraction width must be in 1..={data_width}"
    );
    let shifted = Expr::shl(data.clone(), Expr::resize(position.clone(), data_width));
    Expr::extract(shifted, data_width - 1, data_width - width)
}

/// Extracts a field of symbolic `width` starting at `position` from `data`,
/// producing a value of `target` bits.
///
/// Unsigned fields are zero-extended and signed fields sign-extended to the
/// target width. A zero width yields zero.
#[must_use]
pub fn extract_symbolic(
    data: &Expr,
    position: &Expr,
    width: &Expr,
    target: u32,
    signed: bool,
) -> Expr {
    let data_width = data.width().unwrap_or(0);
    let shifted = Expr::shl(data.clone(), Expr::resize(position.clone(), data_width));
    let distance = Expr::sub(
        Expr::bv(u128::from(data_width), data_width),
        Expr::resize(width.clone(), data_width),
    );
    let aligned = Expr::lshr(shifted, distance);
    let low = Expr::resize(aligned, target);
    if signed {
        let spare = Expr::sub(
            Expr::bv(u128::from(target), target),
            Expr::resize(width.clone(), target),
        );
        Expr::ashr(Expr::shl(low, spare.clone()), spare)
    } else {
        low
    }
}

/// Constrains `value` to be representable in `width` bits with the provided
/// signedness.
///
/// Unsigned values must have no bits set at or above `width`. Signed values
/// are biased by `2^(width - 1)` first, so the two's complement range
/// `-(2^(width - 1))..2^(width - 1)` maps onto the unsigned range.
#[must_use]
pub fn fits_in_width(value: &Expr, width: &Expr, signed: bool) -> Expr {
    let value_width = value.width().unwrap_or(0);
    let amount = Expr::resize(width.clone(), value_width);
    let zero = Expr::bv(0, value_width);
    let candidate = if signed {
        let one = Expr::bv(1, value_width);
        let bias = Expr::shl(one.clone(), Expr::sub(amount.clone(), one));
        Expr::add(value.clone(), bias)
    } else {
        value.clone()
    };
    Expr::equal(Expr::lshr(candidate, amount), zero)
}

/// Constrains the symbolic `width` to be at most `upper_bound`.
#[must_use]
pub fn width_bound(width: &Expr, upper_bound: u32) -> Expr {
    let sort_width = width.width().unwrap_or(0);
    Expr::ule(width.clone(), Expr::bv(u128::from(upper_bound), sort_width))
}

/// The full range constraint for a field of symbolic `width` holding `value`.
#[must_use]
pub fn width_constraint(value: &Expr, width: &Expr, upper_bound: u32, signed: bool) -> Expr {
    Expr::and([
        width_bound(width, upper_bound),
        fits_in_width(value, width, signed),
    ])
}

/// Computes the smallest number of `unit_bits`-bit units needed to hold the
/// unsigned `amount`, saturating at `max_units`.
///
/// The result is a data-position-sorted term.
#[must_use]
pub fn unit_length(amount: &Expr, unit_bits: u32, max_units: u32) -> Expr {
    let amount_width = amount.width().unwrap_or(0);
    let mut result = size(max_units);
    for units in (0..max_units).rev() {
        let Some(shift) = units.checked_mul(unit_bits).filter(|s| *s < amount_width) else {
            continue;
        };
        let limit = BitString::from_u128(1, amount_width).shl(shift as usize);
        result = Expr::ite(
            Expr::ult(amount.clone(), Expr::bits(limit)),
            size(units),
            result,
        );
    }
    result
}
