//! Instruction assembler, shadow-state trackers, and the trace rewriter
//! facade for the STF toolkit (spec components E–H). Built on
//! [`stf_format`]'s record codec/header protocol and [`stf_decode`]'s
//! opcode semantics.

pub mod assembler;
pub mod error;
pub mod rewrite;
pub mod shadow;
pub mod validate;

pub use error::{Result, RewriteError};

/// The common import set for a tool built on this crate: the assembled
/// instruction stream, its region-filtering adapters, the shadow-state
/// trackers, and the rewriter facade.
pub mod prelude {
    pub use crate::assembler::{
        Assembler, Instruction, MemoryAccess, RegisterOperand, TargetRecord, TracepointRegions,
        UntilMarkpoint, UserModeFilter,
    };
    pub use crate::error::{Result, RewriteError};
    pub use crate::rewrite::{
        MergeSegment, PteMode, RewriteAction, Rewriter, RewriterConfig, ToolIdentity, rewrite_merge,
        rewrite_single,
    };
    pub use crate::shadow::{
        DependencyTracker, Dependency, LoadToLoad, PcTracker, PteShadow, RegisterToRegister,
        ShadowRegisterFile, StoreToLoad, TrackPolicy,
    };
    pub use crate::validate::{ValidationFinding, Validator};
}
