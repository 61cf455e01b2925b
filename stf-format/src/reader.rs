//! Record reader (spec §4.4, component D, reader half). Wraps the byte IO
//! layer (A) and the codec (B) and drives the header protocol (C) at open
//! time, then exposes a lazy, finite, non-restartable `next()`.

use std::path::Path;

use stf_types::Error as CodecError;

use crate::descriptor::Descriptor;
use crate::error::{FormatError, Result};
use crate::header::TraceParameters;
use crate::io::{Input, ThreadMode};
use crate::record::Record;
use crate::writer::RecordWriter;

pub struct RecordReader {
    input: Input,
    params: TraceParameters,
    num_records_read: u64,
    num_insts_read: u64,
    /// An opcode record read ahead by [`Self::seek`] to find instruction
    /// `target_instruction`'s boundary, held back so [`Self::next`] is the
    /// one to actually deliver it and advance the counter onto it.
    pending: Option<Record>,
}

impl RecordReader {
    pub fn open(path: &Path, thread_mode: ThreadMode) -> Result<Self> {
        Self::from_input(Input::open(path, thread_mode)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_input(Input::from_memory(bytes))
    }

    fn from_input(mut input: Input) -> Result<Self> {
        let mut params = TraceParameters::default();
        let mut num_records_read = 0u64;
        loop {
            let descriptor = read_descriptor(&mut input)?
                .ok_or_else(|| FormatError::Header("stream ended before END_HEADER".into()))?;
            let record = Record::decode_body(descriptor, &mut input, params.features)?;
            num_records_read += 1;
            if params.observe(&record)? {
                break;
            }
        }
        params.validate()?;
        Ok(Self { input, params, num_records_read, num_insts_read: 0, pending: None })
    }

    pub fn params(&self) -> &TraceParameters {
        &self.params
    }

    pub fn num_records_read(&self) -> u64 {
        self.num_records_read
    }

    pub fn num_insts_read(&self) -> u64 {
        self.num_insts_read
    }

    /// Returns the next body record, or `Ok(None)` at a clean end of
    /// stream (spec §7 — EOF is never an `Err`). The instruction counter
    /// advances *after* an opcode record is returned (spec §4.4).
    pub fn next(&mut self) -> Result<Option<Record>> {
        if let Some(record) = self.pending.take() {
            // `seek` already read this one ahead; it only counted the
            // records leading up to it, so this is where it's actually
            // delivered and the counter lands on it.
            self.num_insts_read += 1;
            return Ok(Some(record));
        }
        let descriptor = match read_descriptor(&mut self.input)? {
            None => return Ok(None),
            Some(d) => d,
        };
        let record = Record::decode_body(descriptor, &mut self.input, self.params.features)?;
        self.num_records_read += 1;
        if record.is_opcode() {
            self.num_insts_read += 1;
        }
        Ok(Some(record))
    }

    /// Repositions the reader so the next call to [`Self::next`] returns
    /// instruction `target_instruction` itself (spec §8 scenario (v)).
    /// Only chunked inputs support this (spec §4.1/§4.4). The chunked
    /// backing only lands on the *chunk* covering `target_instruction`, not
    /// the instruction itself (its `start_instruction` is usually well
    /// below the target), so the instruction counter is seeded from that
    /// landed position and every record up to — but not including —
    /// `target_instruction`'s own opcode is discarded one at a time (spec
    /// §4.1/§4.4 "discards records until index `k` is reached"). That
    /// opcode is read ahead to find the boundary but held as `pending`
    /// rather than discarded, so [`Self::next`] is what actually hands it
    /// back and advances the counter onto it.
    pub fn seek(&mut self, target_instruction: u64) -> Result<()> {
        let start_instruction = self.input.seek_to_instruction(target_instruction)?;
        self.num_insts_read = start_instruction.saturating_sub(1);
        loop {
            let descriptor = match read_descriptor(&mut self.input)? {
                None => {
                    return Err(FormatError::Header(
                        "seek target is past the end of the trace".into(),
                    ))
                }
                Some(d) => d,
            };
            let record = Record::decode_body(descriptor, &mut self.input, self.params.features)?;
            self.num_records_read += 1;
            if record.is_opcode() {
                if self.num_insts_read + 1 >= target_instruction {
                    self.pending = Some(record);
                    return Ok(());
                }
                self.num_insts_read += 1;
            }
        }
    }

    /// Replays this reader's header into `writer` (spec §4.3 "Header
    /// copy"). Preserves the feature bitmap and vlen; the caller may still
    /// append trace-info entries or disable toggleable feature bits on
    /// `writer.params_mut()` before calling `finalize_header`.
    pub fn copy_header(&self, writer: &mut RecordWriter) {
        writer.set_params(self.params.clone());
    }
}

fn read_descriptor(input: &mut Input) -> Result<Option<Descriptor>> {
    use std::io::Read;
    let mut byte = [0u8; 1];
    match input.read(&mut byte) {
        Ok(0) => Ok(None),
        Ok(_) => Descriptor::from_byte(byte[0])
            .map(Some)
            .ok_or_else(|| FormatError::CorruptStream(CodecError::UnknownDiscriminant(byte[0]))),
        Err(e) => Err(FormatError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::RecordWriter;

    fn minimal_trace_bytes() -> Vec<u8> {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "test fixture");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        writer
            .write_record(&Record::InstOpcode32 { opcode: 0x0000_0013, pc: 0x1000 })
            .unwrap();
        writer
            .write_record(&Record::InstOpcode32 { opcode: 0x0000_0013, pc: 0x1004 })
            .unwrap();
        writer.into_memory_bytes().unwrap()
    }

    #[test]
    fn reads_header_then_body_records() {
        let mut reader = RecordReader::from_bytes(minimal_trace_bytes()).unwrap();
        assert_eq!(reader.params().trace_info[0].1, "1.0");
        let first = reader.next().unwrap().unwrap();
        assert!(matches!(first, Record::InstOpcode32 { pc: 0x1000, .. }));
        assert_eq!(reader.num_insts_read(), 1);
        let second = reader.next().unwrap().unwrap();
        assert!(matches!(second, Record::InstOpcode32 { pc: 0x1004, .. }));
        assert_eq!(reader.num_insts_read(), 2);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn unknown_descriptor_byte_is_corrupt_stream() {
        let mut bytes = minimal_trace_bytes();
        bytes.push(0xfe);
        let mut reader = RecordReader::from_bytes(bytes).unwrap();
        reader.next().unwrap();
        reader.next().unwrap();
        let err = reader.next().unwrap_err();
        assert!(matches!(err, FormatError::CorruptStream(_)));
    }

    /// Regression for a seek that lands partway through a chunk: with a
    /// 4-instruction chunk threshold, instruction 7 lives in the second
    /// chunk (`start_instruction` 5), not the first opcode the chunked
    /// backing lands on. `seek` must keep discarding past that chunk
    /// boundary rather than returning as soon as the landed chunk's first
    /// opcode nudges the counter up to the target (spec §4.1/§4.4).
    #[test]
    fn seek_lands_on_the_exact_instruction_not_the_chunk_start() {
        let path = std::env::temp_dir().join(format!(
            "stf-seek-regression-{}.zstf",
            std::process::id()
        ));

        let mut writer = RecordWriter::create(&path, true, 4).unwrap();
        writer.params_mut().append_trace_info(1, "1.0", "seek regression");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        for i in 0..10u64 {
            writer
                .write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 + i * 4 })
                .unwrap();
        }
        writer.close().unwrap();

        let mut reader = RecordReader::open(&path, ThreadMode::NoThreads).unwrap();
        reader.seek(7).unwrap();
        assert_eq!(reader.num_insts_read(), 6);
        let record = reader.next().unwrap().unwrap();
        assert!(matches!(record, Record::InstOpcode32 { pc: 0x1018, .. }));
        assert_eq!(reader.num_insts_read(), 7);

        std::fs::remove_file(&path).ok();
    }
}
