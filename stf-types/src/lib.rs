//! Atomic types shared across the STF toolkit.
//!
//! Mirrors the role `fuel-types` plays for the FuelVM workspace: small,
//! dependency-light primitives that every other crate in the toolkit builds
//! on, plus the low-level codec error type malformed-byte-stream errors are
//! expressed in terms of.

mod error;
mod feature;
mod isa;
mod register;

pub use error::{Error, MAX_STRING_LEN};
pub use feature::FeatureBitmap;
pub use isa::{Iem, Isa};
pub use register::{RegisterId, REG_X0};

/// A single architectural or trace value. RV64 traces widen 32-bit values
/// into this; RV32 traces zero-extend.
pub type Word = u64;

/// 1-based index of an instruction in a trace. Index `0` is never assigned
/// to an instruction; it is used as a sentinel for "no producer yet" by the
/// dependency tracker.
pub type InstIndex = u64;

/// Address-space identifier, keys the page-table shadow.
pub type Asid = u32;
