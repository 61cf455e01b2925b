use thiserror::Error as ThisError;

/// Top-level error type for the assembler, shadow-state trackers, and
/// rewriter facade (spec §7). Wraps the lower layers via `#[from]` the way
/// `fuel-vm`'s `InterpreterError` wraps `TxValidationError`/`io::Error`.
#[derive(Debug, ThisError)]
pub enum RewriteError {
    /// A malformed or out-of-order record stream (spec §7 `CorruptStream`/
    /// `HeaderError`).
    #[error("trace format error: {0}")]
    Format(#[from] stf_format::FormatError),

    /// A record appeared that the active feature bitmap disallows, or a
    /// record required by a declared feature was never seen (spec §7
    /// `FeatureMismatch`). Validator-only: the rewriter counts these and
    /// only aborts if configured to.
    #[error("feature mismatch: {0}")]
    FeatureMismatch(String),

    /// A seek, merge, or skip target named an instruction index past the
    /// end of the available stream(s).
    #[error("requested instruction {requested} but the trace has only {available}")]
    OutOfRange { requested: u64, available: u64 },
}

pub type Result<T> = std::result::Result<T, RewriteError>;
