use std::io;
use thiserror::Error as ThisError;

/// Error taxonomy for the record/header layer (spec §7). `EOF` is
/// deliberately absent: it is represented by `Ok(None)` from
/// [`crate::reader::RecordReader::next`], never propagated as an `Err`.
#[derive(Debug, ThisError)]
pub enum FormatError {
    /// The codec saw an unknown descriptor, or a record's body was
    /// truncated mid-field. The format has no forward-skip for unknown
    /// descriptors, so this is always fatal (spec §4.2).
    #[error("corrupt stream: {0}")]
    CorruptStream(#[from] stf_types::Error),

    /// A chunk's compressed payload failed to decompress, or its trailing
    /// checksum (if any) didn't match. Not retryable.
    #[error("corrupt compressed chunk: {0}")]
    CorruptChunk(String),

    /// A header-class record appeared out of the order mandated by spec
    /// §6.1, or a mandatory header record (`IDENTIFIER`, `VERSION`) was
    /// missing entirely.
    #[error("header error: {0}")]
    Header(String),

    /// A record appeared that the feature bitmap disallows, or a record
    /// required by a declared feature bit never appeared. Validator-only:
    /// callers decide whether to treat this as fatal (spec §7).
    #[error("feature mismatch: {0}")]
    FeatureMismatch(String),

    /// The writer was asked to create a file that already exists and
    /// overwriting wasn't requested.
    #[error("output file already exists")]
    FileExists,

    /// Underlying OS/file-handle error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;
