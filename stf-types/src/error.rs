use thiserror::Error as ThisError;

/// Errors produced while encoding or decoding the raw byte representation of
/// a value. This is the lowest layer of the taxonomy in spec §7: every
/// higher-level error (`stf_format::FormatError`, `stf::RewriteError`, ...)
/// wraps one of these via `#[from]` rather than re-deriving it.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    /// The stream ended before a complete value could be read. Distinct from
    /// the reader-level `EOF` (spec §7): this variant means a value was
    /// *expected* and only partially present, which is always fatal.
    #[error("unexpected end of stream while decoding")]
    UnexpectedEof,

    /// A length-prefixed string's declared length didn't fit in the
    /// remaining buffer, or exceeded the sanity ceiling.
    #[error("string length {0} is not representable or exceeds the sanity limit")]
    InvalidStringLength(u32),

    /// A discriminant byte didn't match any known variant of the enum being
    /// decoded.
    #[error("unknown discriminant {0:#04x}")]
    UnknownDiscriminant(u8),
}

/// Length ceiling for any single length-prefixed string record field.
/// `TRACE_INFO`/`COMMENT` strings are user-controlled; without a ceiling a
/// corrupted or adversarial length prefix could claim an allocation in the
/// gigabytes from a two-byte read.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;
