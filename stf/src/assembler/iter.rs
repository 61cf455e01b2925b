//! Region-filtering iterator adapters over an assembled instruction stream
//! (spec §4.5 "User-mode filter", SPEC_FULL §2 "Region iterators"). These
//! are generically useful to every consumer rather than tied to one CLI
//! tool, so they live in the core rather than in a tool-specific binary
//! (grounded on `stf_region_iterators.hpp`/`stf_tracepoint_iterator.hpp`).

use crate::assembler::Instruction;
use crate::error::Result;

/// Suppresses instructions whose mode is not user at the moment of emission
/// (spec §4.5). Mode is derived from a running boolean updated by observed
/// mode-change events; it is unknown until the first mode-change event is
/// seen, and is treated as "user" until then (spec §4.5).
///
/// An instruction carrying the transition event itself is judged against
/// the mode in effect *before* that instruction runs, then the tracked mode
/// is updated for the instructions that follow it.
pub struct UserModeFilter<I> {
    inner: I,
    in_user_mode: bool,
}

impl<I> UserModeFilter<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, in_user_mode: true }
    }
}

impl<I: Iterator<Item = Result<Instruction>>> Iterator for UserModeFilter<I> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            let inst = match item {
                Ok(inst) => inst,
                err @ Err(_) => return Some(err),
            };
            let emit = self.in_user_mode;
            if inst.is_change_to_user_mode() {
                self.in_user_mode = true;
            }
            if inst.is_change_from_user_mode() {
                self.in_user_mode = false;
            }
            if emit {
                return Some(Ok(inst));
            }
        }
    }
}

/// Filters to only the instructions between a tracepoint start/stop pair
/// (SPEC_FULL §2 "tracepoint region semantics"), grounded on
/// `STFTracepointIterator`: tracepoint instructions alternately open and
/// close a region and are themselves excluded from the output, matching the
/// source's "use tracepoints purely as boundary markers" behavior.
pub struct TracepointRegions<I> {
    inner: I,
    active: bool,
}

impl<I> TracepointRegions<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, active: false }
    }
}

impl<I: Iterator<Item = Result<Instruction>>> Iterator for TracepointRegions<I> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            let inst = match item {
                Ok(inst) => inst,
                err @ Err(_) => return Some(err),
            };
            if inst.decode_info().is_tracepoint {
                self.active = !self.active;
                continue;
            }
            if self.active {
                return Some(Ok(inst));
            }
        }
    }
}

/// Yields instructions up to and including the first markpoint, then stops
/// (spec §8 scenario (iv): "a tool that filters markpoints ends its output
/// at instruction 5").
pub struct UntilMarkpoint<I> {
    inner: I,
    done: bool,
}

impl<I> UntilMarkpoint<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, done: false }
    }
}

impl<I: Iterator<Item = Result<Instruction>>> Iterator for UntilMarkpoint<I> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next()?;
        if let Ok(inst) = &item {
            if inst.decode_info().is_markpoint {
                self.done = true;
            }
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use stf_format::{Record, RecordReader, RecordWriter};

    fn trace_with_mode_change() -> RecordReader {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "mode filter test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        // instruction 1: user mode (default), no event
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }).unwrap();
        // instruction 2: carries the from-user transition, judged under the
        // still-user mode in effect before it runs
        writer
            .write_record(&Record::Event { event_type: crate::assembler::instruction::event_kind::MODE_CHANGE_FROM_USER, data: vec![] })
            .unwrap();
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1004 }).unwrap();
        // instruction 3: now kernel mode, suppressed
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1008 }).unwrap();
        // instruction 4: back to user
        writer
            .write_record(&Record::Event { event_type: crate::assembler::instruction::event_kind::MODE_CHANGE_TO_USER, data: vec![] })
            .unwrap();
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x100c }).unwrap();
        let bytes = writer.into_memory_bytes().unwrap();
        RecordReader::from_bytes(bytes).unwrap()
    }

    #[test]
    fn user_mode_filter_suppresses_kernel_instructions() {
        let asm = Assembler::new(trace_with_mode_change());
        let filtered = UserModeFilter::new(asm);
        let indices: Vec<_> = filtered.map(|r| r.unwrap().index()).collect();
        assert_eq!(indices, vec![1, 2, 4]);
    }

    #[test]
    fn until_markpoint_stops_after_first_hit() {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "markpoint filter test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        for i in 0..4u64 {
            writer
                .write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 + i * 4 })
                .unwrap();
        }
        // instruction 5: or x0, x1, x1 - a markpoint
        let markpoint_word = (5u32 << 15) | (5u32 << 20) | (0b110 << 12) | 0b0110011;
        writer
            .write_record(&Record::InstOpcode32 { opcode: markpoint_word, pc: 0x1010 })
            .unwrap();
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1014 }).unwrap();
        let bytes = writer.into_memory_bytes().unwrap();

        let asm = Assembler::new(RecordReader::from_bytes(bytes).unwrap());
        let filtered = UntilMarkpoint::new(asm);
        let indices: Vec<_> = filtered.map(|r| r.unwrap().index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn tracepoint_region_keeps_only_instructions_inside_it() {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "tracepoint region test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.finalize_header().unwrap();
        let tracepoint_word = (5u32 << 15) | (5u32 << 20) | (0b100 << 12) | 0b0110011;
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }).unwrap(); // outside
        writer.write_record(&Record::InstOpcode32 { opcode: tracepoint_word, pc: 0x1004 }).unwrap(); // start
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1008 }).unwrap(); // inside
        writer.write_record(&Record::InstOpcode32 { opcode: tracepoint_word, pc: 0x100c }).unwrap(); // stop
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1010 }).unwrap(); // outside
        let bytes = writer.into_memory_bytes().unwrap();

        let asm = Assembler::new(RecordReader::from_bytes(bytes).unwrap());
        let filtered = TracepointRegions::new(asm);
        let indices: Vec<_> = filtered.map(|r| r.unwrap().index()).collect();
        assert_eq!(indices, vec![3]);
    }
}
