use thiserror::Error as ThisError;

/// Errors surfaced by the decoder adapter (spec §4.6/§7).
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The back-end rejected `opcode` as illegal or unknown. Per spec §4.6
    /// this is *recovered* by callers: predicates return `false`, lists
    /// come back empty, and `mnemonic()` returns `"c.unimp"` rather than
    /// propagating the error further up the stack.
    #[error("invalid instruction: opcode {0:#010x}")]
    InvalidInst(u32),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
