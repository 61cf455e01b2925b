//! Record writer (spec §4.4, component D, writer half). Buffers header
//! fields until [`RecordWriter::finalize_header`] flushes them in canonical
//! order (spec §6.1) and transitions to body mode; refuses header-class
//! writes afterward.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FormatError, Result};
use crate::header::TraceParameters;
use crate::io::{Output, DEFAULT_CHUNK_INSTRUCTIONS};
use crate::record::Record;

/// Where a [`RecordWriter`] ultimately persists its bytes, tracked so
/// [`RecordWriter::close`] knows whether an atomic rename is needed (spec
/// §6.6).
enum Destination {
    Direct,
    /// Writing through a temp sibling of `final_path`, to be renamed over
    /// it on success. Used when the output path equals the input path.
    Atomic { temp_path: PathBuf, final_path: PathBuf },
    Memory,
}

pub struct RecordWriter {
    output: Output,
    destination: Destination,
    params: TraceParameters,
    header_finalized: bool,
    num_records_written: u64,
    num_insts_written: u64,
}

impl RecordWriter {
    /// Creates a writer backed directly by `path` (spec §4.1: chunked if
    /// the extension is `.zstf`, raw otherwise).
    pub fn create(path: &Path, overwrite: bool, chunk_instructions: u64) -> Result<Self> {
        Ok(Self {
            output: Output::create(path, overwrite, chunk_instructions)?,
            destination: Destination::Direct,
            params: TraceParameters::default(),
            header_finalized: false,
            num_records_written: 0,
            num_insts_written: 0,
        })
    }

    /// Creates a writer that stages its output at a temp sibling of
    /// `final_path` and renames over it in [`Self::close`] (spec §6.6).
    /// Used by the rewriter facade when the output path equals the input
    /// path, so a crash mid-write never corrupts the source trace.
    pub fn create_atomic(final_path: &Path, chunk_instructions: u64) -> Result<Self> {
        let temp_path = temp_sibling_path(final_path);
        let output = Output::create(&temp_path, true, chunk_instructions)?;
        Ok(Self {
            output,
            destination: Destination::Atomic { temp_path, final_path: final_path.to_path_buf() },
            params: TraceParameters::default(),
            header_finalized: false,
            num_records_written: 0,
            num_insts_written: 0,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            output: Output::in_memory(),
            destination: Destination::Memory,
            params: TraceParameters::default(),
            header_finalized: false,
            num_records_written: 0,
            num_insts_written: 0,
        }
    }

    pub fn params(&self) -> &TraceParameters {
        &self.params
    }

    /// Mutable access to the pending header before [`Self::finalize_header`]
    /// is called. Panics if the header was already finalized; a caller that
    /// reaches for this afterward has a logic error, not a recoverable one.
    pub fn params_mut(&mut self) -> &mut TraceParameters {
        assert!(!self.header_finalized, "header already finalized, cannot edit TraceParameters");
        &mut self.params
    }

    /// Overwrites the pending header wholesale (spec §4.3 "Header copy":
    /// `reader.copy_header(writer)` calls this with the reader's params).
    pub fn set_params(&mut self, params: TraceParameters) {
        assert!(!self.header_finalized, "header already finalized, cannot replace TraceParameters");
        self.params = params;
    }

    pub fn num_records_written(&self) -> u64 {
        self.num_records_written
    }

    pub fn num_insts_written(&self) -> u64 {
        self.num_insts_written
    }

    pub fn is_header_finalized(&self) -> bool {
        self.header_finalized
    }

    /// Flushes the header in canonical order and transitions to body mode
    /// (spec §4.3). No header-class record may be written after this.
    pub fn finalize_header(&mut self) -> Result<()> {
        self.params.validate()?;
        for record in self.params.to_records() {
            self.write_record_body(&record)?;
        }
        self.header_finalized = true;
        debug!(trace_info = self.params.trace_info.len(), "header finalized");
        Ok(())
    }

    /// Writes a single body record. Refuses header-class descriptors once
    /// the header has been finalized, and refuses body records before it
    /// has (spec §4.4 "writer refuses to write header-class records after
    /// finalizeHeader").
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if !self.header_finalized {
            return Err(FormatError::Header(
                "cannot write a body record before finalize_header".into(),
            ));
        }
        if record.descriptor().is_header_only() {
            return Err(FormatError::Header(format!(
                "{:?} cannot be written after finalize_header",
                record.descriptor()
            )));
        }
        self.write_record_body(record)
    }

    fn write_record_body(&mut self, record: &Record) -> Result<()> {
        record.encode(&mut self.output, self.params.features)?;
        self.num_records_written += 1;
        if record.is_opcode() {
            self.num_insts_written += 1;
            self.output.note_instruction_boundary(self.num_insts_written)?;
        }
        Ok(())
    }

    /// Flushes any partial chunk and the chunk-index trailer (chunked
    /// backing only; a no-op otherwise).
    pub fn finish(&mut self) -> Result<()> {
        self.output.finish(self.num_insts_written)
    }

    /// Finalizes and, for an atomic writer, renames the temp file over the
    /// final path (spec §6.6). Falls back to copy+delete if the rename
    /// fails because source and destination are on different filesystems.
    pub fn close(mut self) -> Result<()> {
        self.finish()?;
        match &self.destination {
            Destination::Direct | Destination::Memory => Ok(()),
            Destination::Atomic { temp_path, final_path } => {
                persist_atomic(temp_path, final_path)
            }
        }
    }

    /// Returns the written bytes of an in-memory writer without closing it
    /// (tests, and callers building a trace entirely in memory).
    pub fn into_memory_bytes(mut self) -> Result<Option<Vec<u8>>> {
        self.finish()?;
        Ok(self.output.into_memory_bytes())
    }
}

fn temp_sibling_path(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stf-output".to_string());
    let temp_name = format!(".{file_name}.stf-tmp");
    match final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

fn persist_atomic(temp_path: &Path, final_path: &Path) -> Result<()> {
    match fs::rename(temp_path, final_path) {
        Ok(()) => {
            debug!(?final_path, "atomically replaced output trace");
            Ok(())
        }
        Err(_) => {
            // Cross-filesystem rename: fall back to copy + delete (spec §6.6).
            fs::copy(temp_path, final_path)?;
            fs::remove_file(temp_path)?;
            debug!(?final_path, "replaced output trace via copy+delete fallback");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_body_record_before_finalize() {
        let mut writer = RecordWriter::in_memory();
        let err = writer
            .write_record(&Record::InstOpcode16 { opcode: 0, pc: 0 })
            .unwrap_err();
        assert!(matches!(err, FormatError::Header(_)));
    }

    #[test]
    fn refuses_header_record_after_finalize() {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        let err = writer.write_record(&Record::Version { major: 1, minor: 0 }).unwrap_err();
        assert!(matches!(err, FormatError::Header(_)));
    }

    #[test]
    fn counts_instructions_after_opcode_written() {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        writer
            .write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 })
            .unwrap();
        assert_eq!(writer.num_insts_written(), 1);
        let bytes = writer.into_memory_bytes().unwrap().unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn default_chunk_constant_is_used_by_callers() {
        assert_eq!(DEFAULT_CHUNK_INSTRUCTIONS, 100_000);
    }
}
