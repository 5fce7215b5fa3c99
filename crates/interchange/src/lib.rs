//! axon-interchange: Shared IR types and versioned deserialization.
//!
//! Provides typed structs for the AXON intermediate representation -- the
//! backend-agnostic execution plan produced by axon-core and consumed by
//! axon-runtime -- and a single `from_interchange()` entry point that
//! deserializes a `serde_json::Value` into an `IrProgram` after checking
//! `axon_ir_version`.
//!
//! Producer and consumers share these structs so the on-disk JSON shape is
//! defined in exactly one place.

pub mod deserialize;
pub mod types;

pub use deserialize::{from_interchange, InterchangeError};
pub use types::*;

/// Current IR format version. Incompatible changes bump the major.
pub const AXON_IR_VERSION: &str = "1.0";
