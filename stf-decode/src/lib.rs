//! The decoder adapter (spec component F): a cached front end over RISC-V
//! opcode semantics, used by the instruction assembler and by
//! tracepoint/markpoint detection.

pub mod backend;
pub mod decoder;
pub mod error;
pub mod fields;
pub mod markpoint;

pub use backend::{default_backend, DisasmBackend, DisasmBackendKind};
pub use decoder::{DecodeInfo, Decoder};
pub use error::{DecodeError, Result};
