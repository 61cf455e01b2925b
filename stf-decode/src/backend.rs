//! Disassembly back-end trait boundary (spec §6.5, Design Notes "global
//! mutable state in the disassembly back-end"). The core's correctness
//! never depends on this trait: only `DecodeInfo::disassembly` does. The
//! default implementation wraps `yaxpeax-riscv`, the opcode-metadata crate
//! named in §1/§6.5 ("a faithful reimplementation re-uses an existing
//! opcode-metadata library"); the grounding for the call shape (construct a
//! decoder once, feed it a byte reader, `Display` the result) is
//! `samply-api`'s `yaxpeax-x86`/`yaxpeax-arm` usage in `asm/mod.rs`.

use std::env;
use std::sync::OnceLock;

use yaxpeax_arch::{Decoder as YaxpeaxDecoder, Reader, U8Reader};
use yaxpeax_riscv::InstDecoder;

use crate::error::{DecodeError, Result};

/// Renders an opcode to disassembly text. Implementations are free to
/// maintain their own process-global state (the binutils back-end's is a
/// one-time FFI initialization, spec §5 "Shared resources"); the trait
/// hides that from every caller above it.
pub trait DisasmBackend: Send + Sync {
    fn disassemble(&self, opcode: u32, width: u8) -> Result<String>;
}

/// `STF_DISASM` env var (spec §6.5): selects which back-end renders
/// disassembly strings. Core decode semantics (the `is_*` predicates,
/// register lists, mnemonics) are identical either way; only the
/// human-readable string differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasmBackendKind {
    Mavis,
    Binutils,
}

impl DisasmBackendKind {
    pub fn from_env() -> Self {
        match env::var("STF_DISASM").as_deref() {
            Ok("BINUTILS") => Self::Binutils,
            _ => Self::Mavis,
        }
    }
}

/// Constructs the back-end named by `STF_DISASM`, defaulting to the
/// `yaxpeax-riscv`-backed implementation when unset or unrecognized.
pub fn default_backend() -> Box<dyn DisasmBackend> {
    match DisasmBackendKind::from_env() {
        DisasmBackendKind::Mavis => Box::new(YaxpeaxBackend::new()),
        DisasmBackendKind::Binutils => Box::new(BinutilsBackend::new()),
    }
}

/// `yaxpeax-riscv`-backed disassembler. Stateless beyond the decoder
/// configuration itself, so one instance is shared process-wide via
/// [`default_backend`] rather than rebuilt per query.
pub struct YaxpeaxBackend {
    decoder: InstDecoder,
}

impl YaxpeaxBackend {
    pub fn new() -> Self {
        Self { decoder: InstDecoder::default() }
    }
}

impl Default for YaxpeaxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisasmBackend for YaxpeaxBackend {
    fn disassemble(&self, opcode: u32, width: u8) -> Result<String> {
        let bytes = if width == 4 {
            opcode.to_le_bytes().to_vec()
        } else {
            (opcode as u16).to_le_bytes().to_vec()
        };
        let mut reader = U8Reader::new(&bytes);
        let inst = self
            .decoder
            .decode(&mut reader)
            .map_err(|_| DecodeError::InvalidInst(opcode))?;
        Ok(inst.to_string())
    }
}

/// The optional binutils bridge (spec §1 "optional binutils bridge",
/// Design Notes "global mutable state in the disassembly back-end"). The
/// real bridge does a one-time global `bfd`/`opcodes` initialization
/// behind FFI; that initialization is isolated here, guarded by a
/// [`OnceLock`] so it happens at most once per process regardless of how
/// many `BinutilsBackend` instances are constructed. Out of this
/// workspace's narrow interface (spec §1 "consumed through narrow
/// interfaces"): no FFI binding is vendored, so every call reports the
/// back-end as unavailable rather than silently falling back to the
/// default.
pub struct BinutilsBackend {
    _init: &'static (),
}

static BINUTILS_INIT: OnceLock<()> = OnceLock::new();

impl BinutilsBackend {
    pub fn new() -> Self {
        let init = BINUTILS_INIT.get_or_init(|| {
            tracing::warn!("binutils disassembly back-end requested but not linked into this build");
        });
        Self { _init: init }
    }
}

impl Default for BinutilsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DisasmBackend for BinutilsBackend {
    fn disassemble(&self, opcode: u32, _width: u8) -> Result<String> {
        Err(DecodeError::InvalidInst(opcode))
    }
}
