//! Shadow state (spec §4.7, component G): the register file, page-table,
//! and PC trackers a rewriter must keep consistent as records are consumed
//! so that a trace can be sliced while preserving the self-contained-prefix
//! invariant (spec §3.2 invariant 7).

pub mod dependency;
pub mod pc;
pub mod pte;
pub mod registers;

pub use dependency::{Dependency, DependencyTracker, LoadToLoad, RegisterToRegister, StoreToLoad, TrackPolicy};
pub use pc::PcTracker;
pub use pte::PteShadow;
pub use registers::{ScalarOrVector, ShadowRegisterFile};
