//! This module contains constants that are needed throughout the codebase.

/// The maximum number of data bits that can be stored in a single cell.
pub const MAX_DATA_BITS: u32 = 1023;

/// The maximum number of references that a single cell can hold.
pub const MAX_REFS: u32 = 4;

/// The width of the bit-vector sort used for cell data positions and lengths.
///
/// It is deliberately wider than is needed to represent [`MAX_DATA_BITS`] so
/// that the sum of several field widths cannot overflow before it is compared
/// against the data length.
pub const SIZE_BITS: u32 = 16;

/// The width of the bit-vector sort used for reference positions and counts.
pub const REFS_BITS: u32 = 8;

/// The width of the canonical integer sort that all integer reads are extended
/// to.
///
/// This matches the 257-bit integers used by the stack machine.
pub const CANONICAL_INT_BITS: u32 = 257;

/// The widest integer field a schema may declare.
pub const MAX_INT_BITS: u32 = 256;

/// The width of the memory field that stores the chosen variant of a switch.
pub const SWITCH_CHOICE_BITS: u32 = 8;

/// The number of bits in the length prefix of a coin amount.
pub const COINS_LENGTH_BITS: u32 = 4;

/// The number of bits in each unit of a coin amount's length prefix.
pub const COINS_UNIT_BITS: u32 = 8;

/// The largest number of units that a coin amount can occupy.
pub const COINS_MAX_UNITS: u32 = (1 << COINS_LENGTH_BITS) - 1;

/// The width of a standard internal address (`addr_std$10 anycast:(Maybe
/// Anycast) workchain_id:int8 address:bits256`) without anycast.
pub const STD_ADDRESS_BITS: u32 = 267;

/// The default budget of composite-label expansions used when building parsing
/// stacks.
pub const DEFAULT_MAX_TLB_DEPTH: u32 = 5;

/// The default number of reference levels that child-constraint generation
/// recurses through.
pub const DEFAULT_MAX_CELL_DEPTH: u32 = 4;

/// The default static upper bound on the value of any symbolic field width.
pub const DEFAULT_LENGTH_UPPER_BOUND: u32 = MAX_DATA_BITS;

/// Whether structural mismatches on freshly-constructed cells are reported as
/// errors by default.
pub const DEFAULT_STRICT_TLB_CHECKS: bool = true;
