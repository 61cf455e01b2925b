//! Abstract byte stream (spec §4.1, component A). Three concrete backings
//! share one entry point: an uncompressed file, a chunked ZSTD file (the
//! `.zstf` extension), and an in-memory buffer, the last used by tests and
//! by callers assembling a trace that never touches disk.

pub mod chunked;
pub mod raw;

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;

pub use chunked::ChunkIndexEntry;

use crate::error::Result;

pub const DEFAULT_CHUNK_INSTRUCTIONS: u64 = 100_000;
const CHUNKED_EXTENSION: &str = "zstf";

/// Whether a chunked reader is allowed to overlap decompression of the next
/// chunk with consumption of the current one on a helper thread (spec
/// §5 "one exception is byte-level compression"). Tools that only ever
/// touch one chunk should open in `NoThreads` mode so a speculative chunk
/// is never decompressed needlessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    Background,
    NoThreads,
}

fn is_chunked_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(CHUNKED_EXTENSION)
}

pub enum Input {
    Raw(BufReader<File>),
    Memory(Cursor<Vec<u8>>),
    Chunked(chunked::ChunkedReader),
}

impl Input {
    pub fn open(path: &Path, thread_mode: ThreadMode) -> Result<Self> {
        if is_chunked_path(path) {
            Ok(Input::Chunked(chunked::ChunkedReader::open(path, thread_mode)?))
        } else {
            Ok(Input::Raw(raw::open_read(path)?))
        }
    }

    pub fn from_memory(bytes: Vec<u8>) -> Self {
        Input::Memory(Cursor::new(bytes))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, Input::Chunked(_))
    }

    /// Repositions to the instruction named by `target`. Only the chunked
    /// backing supports this (spec §4.1); callers must check
    /// [`Input::is_seekable`] first. Returns the `start_instruction` of the
    /// chunk actually landed on, which the caller must keep discarding
    /// records from until it reaches `target` exactly.
    pub fn seek_to_instruction(&mut self, target: u64) -> Result<u64> {
        match self {
            Input::Chunked(reader) => reader.seek_to_instruction(target),
            _ => Err(crate::error::FormatError::Header(
                "seek(instruction_index) is only supported on chunked files".into(),
            )),
        }
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Input::Raw(r) => r.read(buf),
            Input::Memory(r) => r.read(buf),
            Input::Chunked(r) => r.read(buf),
        }
    }
}

pub enum Output {
    Raw(File),
    Memory(Cursor<Vec<u8>>),
    Chunked(chunked::ChunkedWriter),
}

impl Output {
    pub fn create(path: &Path, overwrite: bool, chunk_instructions: u64) -> Result<Self> {
        if is_chunked_path(path) {
            Ok(Output::Chunked(chunked::ChunkedWriter::create(
                path,
                overwrite,
                chunk_instructions,
            )?))
        } else {
            Ok(Output::Raw(raw::create_write(path, overwrite)?))
        }
    }

    pub fn in_memory() -> Self {
        Output::Memory(Cursor::new(Vec::new()))
    }

    pub fn into_memory_bytes(self) -> Option<Vec<u8>> {
        match self {
            Output::Memory(cursor) => Some(cursor.into_inner()),
            _ => None,
        }
    }

    /// Notifies a chunked backing that `instruction_index` was the index of
    /// the instruction just completed, so it can decide whether to close
    /// the current chunk. A no-op on the other backings.
    pub fn note_instruction_boundary(&mut self, instruction_index: u64) -> Result<()> {
        if let Output::Chunked(writer) = self {
            writer.note_instruction_boundary(instruction_index)?;
        }
        Ok(())
    }

    /// Finalizes the stream: flushes any partial chunk and appends the
    /// chunk index trailer. `last_instruction_index` is `0` if no
    /// instructions were ever written. Takes `&mut self` rather than
    /// consuming `self` so a caller can still reach into `Output::Memory`
    /// afterward (e.g. in tests) to read back the written bytes.
    pub fn finish(&mut self, last_instruction_index: u64) -> Result<()> {
        match self {
            Output::Raw(file) => {
                file.flush()?;
                Ok(())
            }
            Output::Memory(c) => {
                c.flush()?;
                Ok(())
            }
            Output::Chunked(_) => {
                if let Output::Chunked(writer) =
                    std::mem::replace(self, Output::Memory(Cursor::new(Vec::new())))
                {
                    writer.finish(last_instruction_index)?;
                }
                Ok(())
            }
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Output::Raw(f) => f.write(buf),
            Output::Memory(c) => c.write(buf),
            Output::Chunked(writer) => {
                writer.write_bytes(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Output::Raw(f) => f.flush(),
            Output::Memory(c) => c.flush(),
            Output::Chunked(_) => Ok(()),
        }
    }
}
