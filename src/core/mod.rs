//! Core Primitives
//!
//! Byte-exact building blocks shared by the distribution layer.
//! Nothing in here holds state.

pub mod address;
pub mod hash;

pub use address::{Address, AddressParseError};
pub use hash::{AbiHasher, Hash32, keccak256};
