//! Trace rewriter facade (spec §4.8, component H): the read-modify-write
//! loop shared by every tool that outputs a trace (dump-with-edits,
//! extract, morph, merge, ...). Coordinates the byte IO, codec, header
//! protocol, assembler, and shadow-state layers (A–G) so a caller only has
//! to supply a start/end range and a per-instruction transform.

use std::path::{Path, PathBuf};

use stf_types::{InstIndex, Word};

use stf_format::{RecordReader, RecordWriter, ThreadMode, TraceParameters};

use crate::assembler::{Assembler, Instruction};
use crate::error::{Result, RewriteError};
use crate::shadow::{PcTracker, PteShadow, ShadowRegisterFile};

/// How the rewriter flushes/replenishes page-table entries in the output
/// trace (spec §4.7 "PTE shadow").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteMode {
    /// Emit every live PTE right after the new header (spec §4.7 item 1).
    DumpAll,
    /// Emit a PTE inline the first time each instruction touches a page
    /// whose translation hasn't been emitted yet in this output (spec §4.7
    /// item 2).
    OnDemand,
    /// Don't emit any PTEs; only track which pages were touched (spec §4.7
    /// item 3, used by validators rather than trace-producing tools).
    MarkOnly,
}

/// Tunables for one rewrite pass (SPEC_FULL §1 "Configuration":
/// `ReaderConfig`/`WriterConfig`, analogous to the teacher's
/// `InterpreterParams` builder).
#[derive(Debug, Clone)]
pub struct RewriterConfig {
    pub pte_mode: PteMode,
    pub ignore_pid_mismatch: bool,
    pub thread_mode: ThreadMode,
    pub chunk_instructions: u64,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            pte_mode: PteMode::OnDemand,
            ignore_pid_mismatch: false,
            thread_mode: ThreadMode::Background,
            chunk_instructions: stf_format::DEFAULT_CHUNK_INSTRUCTIONS,
        }
    }
}

/// The rewriter's own identity, appended as a fresh `TRACE_INFO` entry on
/// top of every entry already carried by the input trace (spec §4.3/§4.8
/// step 3).
#[derive(Debug, Clone)]
pub struct ToolIdentity {
    pub generator_id: u8,
    pub version: String,
    pub comment: String,
}

/// What to do with one instruction as it passes through the rewriter (spec
/// §4.8 step 4 "either pass it through, transform it, or drop it").
pub enum RewriteAction {
    /// Write the instruction's original wire records unmodified.
    Keep,
    /// Omit the instruction entirely.
    Drop,
    /// Write these records instead of the instruction's own. The caller is
    /// responsible for including a terminating opcode record if the
    /// replacement should still count as an instruction.
    Replace(Vec<stf_format::Record>),
}

/// Drives one open output trace through the read-modify-write loop. Built
/// by [`rewrite_single`]/[`rewrite_merge`] rather than directly, since
/// constructing one correctly requires consuming the pre-start prefix of a
/// reader to seed its shadow state (spec §4.8 step 2).
pub struct Rewriter {
    writer: RecordWriter,
    reg_shadow: ShadowRegisterFile,
    pte_shadow: PteShadow,
    pc: PcTracker,
    config: RewriterConfig,
    current_pid: u32,
    buffered_comments: Vec<String>,
    header_finalized: bool,
}

impl Rewriter {
    fn new(params: &TraceParameters, writer: RecordWriter, config: RewriterConfig) -> Self {
        let current_pid = params.process_id.map(|(_, _, _, asid)| asid).unwrap_or(0);
        let reg_shadow = ShadowRegisterFile::from_initial_state(&params.initial_reg_state);
        let pte_shadow =
            PteShadow::from_initial_ptes(&params.initial_ptes, current_pid, config.ignore_pid_mismatch);
        let pc = PcTracker::new(params.initial_pc.unwrap_or(0));
        Self {
            writer,
            reg_shadow,
            pte_shadow,
            pc,
            config,
            current_pid,
            buffered_comments: Vec::new(),
            header_finalized: false,
        }
    }

    /// Folds one pre-start instruction into the shadow state without
    /// writing anything (spec §4.8 step 2).
    fn observe_skipped(&mut self, inst: &Instruction) {
        self.fold_shadow(inst);
        self.advance_pc(inst);
        self.buffered_comments.extend(inst.comments().map(str::to_owned));
    }

    fn fold_shadow(&mut self, inst: &Instruction) {
        if let Some(asid) = inst.asid() {
            self.current_pid = asid;
        }
        for record in inst.orig_records() {
            self.reg_shadow.observe(record);
            if let stf_format::Record::PageTableWalk { va, pa, page_size_log2, first_use_index, entries } =
                record
            {
                self.pte_shadow.update(
                    self.current_pid,
                    *va,
                    *pa,
                    *page_size_log2,
                    *first_use_index,
                    entries.clone(),
                );
            }
        }
    }

    fn advance_pc(&mut self, inst: &Instruction) {
        if let Some(target) = inst.branch_target() {
            self.pc.force(target);
        } else if let Some(forced) = inst.forced_pc() {
            self.pc.force(forced);
        } else {
            self.pc.advance(inst.opcode_size());
        }
    }

    /// Builds and flushes the new header (spec §4.8 step 3): copies the
    /// source header, appends `own_trace_info`, sets the initial PC to the
    /// PC reached after skipping, flushes the shadow register state, and
    /// flushes live PTEs in [`PteMode::DumpAll`] mode.
    fn finalize_header(&mut self, source_params: &TraceParameters, own_trace_info: ToolIdentity) -> Result<()> {
        let mut params = source_params.clone();
        params.append_trace_info(own_trace_info.generator_id, own_trace_info.version, own_trace_info.comment);
        params.initial_pc = Some(self.pc.current());
        params.set_initial_reg_state(self.reg_shadow.to_initial_state());
        params.leading_comments.extend(self.buffered_comments.drain(..));
        if matches!(self.config.pte_mode, PteMode::DumpAll) {
            params.set_initial_ptes(self.pte_shadow.to_initial_ptes());
        } else {
            params.set_initial_ptes(Vec::new());
            self.pte_shadow.reset_used();
        }
        self.writer.set_params(params);
        self.writer.finalize_header()?;
        self.header_finalized = true;
        Ok(())
    }

    /// Emits any not-yet-used PTE an instruction's PC or memory accesses
    /// touch, just before the instruction itself (spec §4.8 step 4,
    /// §4.7 item 2). A page-crossing access can require two PTEs.
    fn emit_pending_ptes(&mut self, inst: &Instruction) -> Result<()> {
        if !matches!(self.config.pte_mode, PteMode::OnDemand) {
            return Ok(());
        }
        if let Some(asid) = inst.asid() {
            self.current_pid = asid;
        }
        if let Some(record) = self.pte_shadow.emit_if_unused(self.current_pid, inst.pc()) {
            self.writer.write_record(&record)?;
        }
        for access in inst.memory_accesses() {
            if let Some(record) = self.pte_shadow.emit_if_unused(self.current_pid, access.vaddr) {
                self.writer.write_record(&record)?;
            }
            let last_byte = access.vaddr.wrapping_add(access.size.saturating_sub(1) as Word);
            if last_byte != access.vaddr {
                if let Some(record) = self.pte_shadow.emit_if_unused(self.current_pid, last_byte) {
                    self.writer.write_record(&record)?;
                }
            }
        }
        Ok(())
    }

    /// Processes one in-range instruction: updates shadow state, emits any
    /// on-demand PTEs it touches, then writes the action's records (spec
    /// §4.8 step 4).
    fn emit(&mut self, inst: &Instruction, action: RewriteAction) -> Result<()> {
        debug_assert!(self.header_finalized, "finalize_header must run before emit");
        self.emit_pending_ptes(inst)?;
        match action {
            RewriteAction::Keep => {
                for record in inst.to_wire_records() {
                    self.writer.write_record(&record)?;
                }
            }
            RewriteAction::Drop => {}
            RewriteAction::Replace(records) => {
                for record in records {
                    self.writer.write_record(&record)?;
                }
            }
        }
        self.fold_shadow(inst);
        self.advance_pc(inst);
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.writer.close()?;
        Ok(())
    }
}

/// Runs `reader` forward, folding every instruction before `start` into
/// `rewriter`'s shadow state, and returns the first instruction at or past
/// `start` (spec §4.8 step 2). `Err(OutOfRange)` if the stream ends first.
fn skip_to(assembler: &mut Assembler, rewriter: &mut Rewriter, start: InstIndex) -> Result<Instruction> {
    loop {
        match assembler.next_instruction()? {
            None => {
                return Err(RewriteError::OutOfRange {
                    requested: start,
                    available: assembler.reader().num_insts_read(),
                })
            }
            Some(inst) if inst.index() >= start => return Ok(inst),
            Some(inst) => rewriter.observe_skipped(&inst),
        }
    }
}

/// Single-file read-modify-write (spec §4.8 steps 1-5). `callback` decides
/// what happens to each instruction in `[start, end]` (`end = None` means
/// "through end of stream").
pub fn rewrite_single(
    input_path: &Path,
    output_path: &Path,
    start: InstIndex,
    end: Option<InstIndex>,
    own_trace_info: ToolIdentity,
    config: RewriterConfig,
    mut callback: impl FnMut(&Instruction) -> RewriteAction,
) -> Result<()> {
    let reader = RecordReader::open(input_path, config.thread_mode)?;
    let params = reader.params().clone();
    let mut assembler = Assembler::new(reader);

    let writer = if input_path == output_path {
        RecordWriter::create_atomic(output_path, config.chunk_instructions)?
    } else {
        RecordWriter::create(output_path, true, config.chunk_instructions)?
    };
    let mut rewriter = Rewriter::new(&params, writer, config);

    let mut inst = skip_to(&mut assembler, &mut rewriter, start)?;
    rewriter.finalize_header(&params, own_trace_info)?;

    loop {
        if let Some(end) = end {
            if inst.index() > end {
                break;
            }
        }
        let action = callback(&inst);
        rewriter.emit(&inst, action)?;
        inst = match assembler.next_instruction()? {
            None => break,
            Some(next) => next,
        };
    }
    rewriter.close()
}

/// One input to [`rewrite_merge`]: the instruction range `[start, end]` of
/// `path`, repeated `repeat` times (spec §4.8 "Merge variant").
#[derive(Debug, Clone)]
pub struct MergeSegment {
    pub path: PathBuf,
    pub start: InstIndex,
    pub end: Option<InstIndex>,
    pub repeat: u32,
}

/// Concatenates one or more input traces into a single output (spec §4.8
/// "Merge variant"). If consecutive segments name the same file with
/// non-overlapping, forward-only ranges, the reader is not reopened and the
/// register/PTE shadows are retained across the gap between them; anything
/// else (a different file, a repeat, or a range that would require
/// rewinding) reopens that file from the start.
pub fn rewrite_merge(
    segments: &[MergeSegment],
    output_path: &Path,
    own_trace_info: ToolIdentity,
    config: RewriterConfig,
    mut callback: impl FnMut(&Instruction) -> RewriteAction,
) -> Result<()> {
    let first = segments
        .first()
        .ok_or_else(|| RewriteError::FeatureMismatch("merge requires at least one segment".into()))?;

    let mut active_path = first.path.clone();
    let opened = RecordReader::open(&active_path, config.thread_mode)?;
    let first_params = opened.params().clone();
    let mut active = Assembler::new(opened);
    let mut position: InstIndex = 1;

    let writer = RecordWriter::create(output_path, true, config.chunk_instructions)?;
    let mut rewriter = Rewriter::new(&first_params, writer, config.clone());
    let mut header_done = false;

    for segment in segments {
        for _ in 0..segment.repeat.max(1) {
            let need_reopen = active_path != segment.path || position > segment.start;
            if need_reopen {
                active_path = segment.path.clone();
                active = Assembler::new(RecordReader::open(&active_path, config.thread_mode)?);
                position = 1;
            }

            let mut inst = loop {
                match active.next_instruction()? {
                    None => {
                        return Err(RewriteError::OutOfRange {
                            requested: segment.start,
                            available: active.reader().num_insts_read(),
                        })
                    }
                    Some(inst) if inst.index() >= segment.start => break inst,
                    Some(inst) => {
                        if !header_done {
                            rewriter.observe_skipped(&inst);
                        }
                        position = inst.index() + 1;
                    }
                }
            };

            if !header_done {
                rewriter.finalize_header(&first_params, own_trace_info.clone())?;
                header_done = true;
            }

            loop {
                if let Some(end) = segment.end {
                    if inst.index() > end {
                        break;
                    }
                }
                let action = callback(&inst);
                rewriter.emit(&inst, action)?;
                position = inst.index() + 1;
                inst = match active.next_instruction()? {
                    None => break,
                    Some(next) => next,
                };
            }
        }
    }

    rewriter.close()
}

impl Clone for ToolIdentity {
    fn clone(&self) -> Self {
        Self {
            generator_id: self.generator_id,
            version: self.version.clone(),
            comment: self.comment.clone(),
        }
    }
}
