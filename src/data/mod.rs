//! This module contains custom data structures used in the implementation of
//! the engine.

pub mod bit_string;
pub mod cow;
