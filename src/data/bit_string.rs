//! This module contains the definition of [`BitString`], a concrete sequence of
//! bits as found in cell data, along with the fixed-width arithmetic needed to
//! evaluate bit-vector terms over it.
//!
//! # Bit Ordering
//!
//! Bits are stored most-significant first, which is the order in which they
//! appear in a cell. When a bit string is interpreted as a number, the first
//! bit is the most significant one. Operations that take bit indices in the
//! style of bit-vector logics (such as [`BitString::extract`]) number the bits
//! from the _least_ significant end, with bit `0` being the last bit stored.

use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
};

use bitvec::{order::Msb0, vec::BitVec};
use ethnum::{I256, U256};

/// A concrete string of bits of known length.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct BitString {
    bits: BitVec<u8, Msb0>,
}

impl BitString {
    /// Creates an empty bit string.
    #[must_use]
    pub fn new() -> Self {
        let bits = BitVec::new();
        Self { bits }
    }

    /// Creates a bit string consisting of `width` zero bits.
    #[must_use]
    pub fn zeros(width: u32) -> Self {
        let bits = BitVec::repeat(false, width as usize);
        Self { bits }
    }

    /// Creates a bit string consisting of `width` one bits.
    #[must_use]
    pub fn ones(width: u32) -> Self {
        let bits = BitVec::repeat(true, width as usize);
        Self { bits }
    }

    /// Parses a bit string from a sequence of `0` and `1` characters.
    ///
    /// Returns [`None`] if any other character is present.
    #[must_use]
    pub fn from_binary(text: &str) -> Option<Self> {
        let mut bits = BitVec::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ => return None,
            }
        }
        Some(Self { bits })
    }

    /// Creates a bit string from the provided `bytes`, taking the first `width`
    /// bits of them.
    ///
    /// Missing bits are filled with zero.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], width: u32) -> Self {
        let mut bits = BitVec::<u8, Msb0>::from_slice(bytes);
        bits.resize(width as usize, false);
        Self { bits }
    }

    /// Creates a bit string of `width` bits holding the low bits of `value`.
    ///
    /// If `width` exceeds 128 bits the value is zero-extended.
    #[must_use]
    pub fn from_u128(value: u128, width: u32) -> Self {
        let mut bits = BitVec::with_capacity(width as usize);
        for i in (0..width).rev() {
            let bit = i < 128 && (value >> i) & 1 == 1;
            bits.push(bit);
        }
        Self { bits }
    }

    /// Creates a bit string of `width` bits holding the two's complement
    /// encoding of `value`.
    ///
    /// If `width` exceeds 128 bits the value is sign-extended.
    #[must_use]
    pub fn from_i128(value: i128, width: u32) -> Self {
        let mut bits = BitVec::with_capacity(width as usize);
        for i in (0..width).rev() {
            let bit = if i < 128 { (value >> i) & 1 == 1 } else { value < 0 };
            bits.push(bit);
        }
        Self { bits }
    }

    /// Creates a bit string of `width` bits holding the low bits of `value`,
    /// zero-extending if `width` exceeds 256 bits.
    #[must_use]
    pub fn from_u256(value: U256, width: u32) -> Self {
        let mut bits = BitVec::with_capacity(width as usize);
        for i in (0..width).rev() {
            let bit = i < 256 && (value >> i) & U256::ONE == U256::ONE;
            bits.push(bit);
        }
        Self { bits }
    }

    /// Creates a bit string of `width` bits holding the two's complement
    /// encoding of `value`, sign-extending if `width` exceeds 256 bits.
    #[must_use]
    pub fn from_i256(value: I256, width: u32) -> Self {
        let mut bits = BitVec::with_capacity(width as usize);
        for i in (0..width).rev() {
            let bit = if i < 256 {
                (value >> i) & I256::ONE == I256::ONE
            } else {
                value < I256::ZERO
            };
            bits.push(bit);
        }
        Self { bits }
    }

    /// Gets the number of bits in the string.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.bits.len()).unwrap_or(u32::MAX)
    }

    /// Checks if the string contains no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Gets the bit at `index`, counting from the first (most significant)
    /// bit.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<bool> {
        self.bits.get(index as usize).map(|b| *b)
    }

    /// Appends a single `bit` to the end of the string.
    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Appends the bits of `other` to the end of the string.
    pub fn append(&mut self, other: &BitString) {
        self.bits.extend_from_bitslice(other.bits.as_bitslice());
    }

    /// Creates a new string that is `self` followed by `other`.
    #[must_use]
    pub fn concat(&self, other: &BitString) -> Self {
        let mut result = self.clone();
        result.append(other);
        result
    }

    /// Takes `length` bits starting at `start` (counting from the first bit).
    ///
    /// The range is clamped to the bits that are actually present.
    #[must_use]
    pub fn slice(&self, start: u32, length: u32) -> Self {
        let len = self.bits.len();
        let start = (start as usize).min(len);
        let end = start.saturating_add(length as usize).min(len);
        let bits = self.bits[start..end].to_bitvec();
        Self { bits }
    }

    /// Checks if `self` begins with the bits of `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &BitString) -> bool {
        self.bits.starts_with(prefix.bits.as_bitslice())
    }

    /// Iterates over the bits from first to last.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().by_vals()
    }

    /// Renders the string as a sequence of `0` and `1` characters.
    #[must_use]
    pub fn to_binary(&self) -> String {
        self.iter().map(|b| if b { '1' } else { '0' }).collect()
    }

    /// Gets the bits packed into bytes, with the final byte zero-padded.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        let padded = bits.len().div_ceil(8) * 8;
        bits.resize(padded, false);
        bits.into_vec()
    }

    /// Checks if every bit is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bits.not_any()
    }

    /// Gets the most significant bit, or `false` for an empty string.
    #[must_use]
    pub fn msb(&self) -> bool {
        self.get(0).unwrap_or(false)
    }

    /// Interprets the bits as an unsigned number, returning [`None`] if it does
    /// not fit into a [`u128`].
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        let mut result: u128 = 0;
        for bit in self.iter() {
            if result >> 127 != 0 {
                return None;
            }
            result = (result << 1) | u128::from(bit);
        }
        Some(result)
    }

    /// Interprets the bits as a two's complement number, returning [`None`] if
    /// it does not fit into an [`i128`].
    #[must_use]
    pub fn to_i128(&self) -> Option<i128> {
        if self.is_empty() {
            return Some(0);
        }
        let negative = self.msb();
        let magnitude = if negative {
            self.wrapping_neg()
        } else {
            self.clone()
        };
        let value = magnitude.to_u128()?;
        if negative {
            if value > i128::MAX as u128 + 1 {
                return None;
            }
            Some((value as i128).wrapping_neg())
        } else {
            i128::try_from(value).ok()
        }
    }

    /// Interprets the bits as an unsigned number, returning [`None`] if it does
    /// not fit into a [`U256`].
    #[must_use]
    pub fn to_u256(&self) -> Option<U256> {
        let mut result = U256::ZERO;
        for bit in self.iter() {
            if result >> 255u32 != U256::ZERO {
                return None;
            }
            result = (result << 1u32) | if bit { U256::ONE } else { U256::ZERO };
        }
        Some(result)
    }

    /// Interprets the bits as a two's complement number, returning [`None`] if
    /// it does not fit into an [`I256`].
    #[must_use]
    pub fn to_i256(&self) -> Option<I256> {
        if self.is_empty() {
            return Some(I256::ZERO);
        }
        let width = self.len();
        if width <= 256 {
            let extended = self.sign_extend(256 - width);
            return extended.to_u256().map(|v| v.as_i256());
        }
        // Wider values fit only if the surplus bits are all copies of bit 255.
        let surplus = width - 256;
        let low = self.slice(surplus, 256);
        let sign = low.msb();
        if self.slice(0, surplus).iter().any(|b| b != sign) {
            return None;
        }
        low.to_u256().map(|v| v.as_i256())
    }

    /// Interprets the bits as an unsigned number, saturating at
    /// [`usize::MAX`].
    #[must_use]
    pub fn to_usize_saturating(&self) -> usize {
        self.to_u128()
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(usize::MAX)
    }

    /// Bitwise negation.
    #[must_use]
    pub fn not(&self) -> Self {
        let bits = !self.bits.clone();
        Self { bits }
    }

    /// Addition modulo `2^len`.
    ///
    /// Both operands are expected to have the same width, and the result has
    /// the width of `self`.
    #[must_use]
    pub fn wrapping_add(&self, rhs: &BitString) -> Self {
        let width = self.bits.len();
        let mut result = BitVec::<u8, Msb0>::repeat(false, width);
        let mut carry = false;
        for i in (0..width).rev() {
            let a = self.bits[i];
            let b = rhs.bits.get(i).map_or(false, |b| *b);
            result.set(i, a ^ b ^ carry);
            carry = (a && b) || (carry && (a ^ b));
        }
        Self { bits: result }
    }

    /// Two's complement negation modulo `2^len`.
    #[must_use]
    pub fn wrapping_neg(&self) -> Self {
        let one = Self::from_u128(1, self.len());
        self.not().wrapping_add(&one)
    }

    /// Subtraction modulo `2^len`.
    #[must_use]
    pub fn wrapping_sub(&self, rhs: &BitString) -> Self {
        self.wrapping_add(&rhs.wrapping_neg())
    }

    /// Multiplication modulo `2^len`.
    #[must_use]
    pub fn wrapping_mul(&self, rhs: &BitString) -> Self {
        let width = self.len();
        let mut result = Self::zeros(width);
        for (position, bit) in rhs.iter().enumerate() {
            if bit {
                let shift = rhs.len() - 1 - u32::try_from(position).unwrap_or(u32::MAX);
                result = result.wrapping_add(&self.shl(shift as usize));
            }
        }
        result
    }

    /// Logical left shift by `amount` bits, keeping the width.
    #[must_use]
    pub fn shl(&self, amount: usize) -> Self {
        let width = self.bits.len();
        let mut bits = BitVec::<u8, Msb0>::repeat(false, width);
        if amount < width {
            for i in 0..width - amount {
                bits.set(i, self.bits[i + amount]);
            }
        }
        Self { bits }
    }

    /// Logical right shift by `amount` bits, keeping the width.
    #[must_use]
    pub fn lshr(&self, amount: usize) -> Self {
        self.shift_right(amount, false)
    }

    /// Arithmetic right shift by `amount` bits, keeping the width.
    #[must_use]
    pub fn ashr(&self, amount: usize) -> Self {
        self.shift_right(amount, self.msb())
    }

    fn shift_right(&self, amount: usize, fill: bool) -> Self {
        let width = self.bits.len();
        let mut bits = BitVec::<u8, Msb0>::repeat(fill, width);
        if amount < width {
            for i in amount..width {
                bits.set(i, self.bits[i - amount]);
            }
        }
        Self { bits }
    }

    /// Unsigned comparison of two strings of equal width.
    #[must_use]
    pub fn unsigned_cmp(&self, rhs: &BitString) -> Ordering {
        for (a, b) in self.iter().zip(rhs.iter()) {
            match (a, b) {
                (false, true) => return Ordering::Less,
                (true, false) => return Ordering::Greater,
                _ => {}
            }
        }
        Ordering::Equal
    }

    /// Signed (two's complement) comparison of two strings of equal width.
    #[must_use]
    pub fn signed_cmp(&self, rhs: &BitString) -> Ordering {
        match (self.msb(), rhs.msb()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.unsigned_cmp(rhs),
        }
    }

    /// Extracts bits `high` down to `low` inclusive, where bit `0` is the least
    /// significant bit.
    #[must_use]
    pub fn extract(&self, high: u32, low: u32) -> Self {
        let width = self.len();
        let start = width - 1 - high;
        self.slice(start, high - low + 1)
    }

    /// Extends the string by `by` zero bits on the most significant end.
    #[must_use]
    pub fn zero_extend(&self, by: u32) -> Self {
        Self::zeros(by).concat(self)
    }

    /// Extends the string by `by` copies of its sign bit on the most
    /// significant end.
    #[must_use]
    pub fn sign_extend(&self, by: u32) -> Self {
        let fill = if self.msb() { Self::ones(by) } else { Self::zeros(by) };
        fill.concat(self)
    }

    /// Changes the width of the string to `width`, zero-extending or keeping
    /// only the least significant bits as needed.
    #[must_use]
    pub fn resize_unsigned(&self, width: u32) -> Self {
        let current = self.len();
        match current.cmp(&width) {
            Ordering::Less => self.zero_extend(width - current),
            Ordering::Equal => self.clone(),
            Ordering::Greater => self.slice(current - width, width),
        }
    }
}

impl Debug for BitString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{{{}}}", self.to_binary())
    }
}

/// Byte-aligned strings are rendered as hexadecimal, and all others bit by bit.
impl Display for BitString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.is_empty() && self.len() % 8 == 0 {
            write!(f, "x{{{}}}", hex::encode(self.to_bytes()))
        } else {
            write!(f, "b{{{}}}", self.to_binary())
        }
    }
}
