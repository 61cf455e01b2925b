//! Trace validator (spec §7 `FeatureMismatch`, §3.2 invariants 5/6/8, §8
//! testable property 7 and scenario (vi)). Unlike the codec, which treats
//! the feature bitmap as authoritative framing information and never
//! rejects a record on its account, the validator walks an already
//! assembled instruction stream and cross-checks declared features against
//! observed record content. Findings are counted and reported, never
//! fatal on their own (spec §7: "Tools decide fatality; the core reports").

use stf_format::Record;
use stf_types::{FeatureBitmap, Word};

use crate::assembler::Instruction;
use crate::shadow::{PcTracker, PteShadow};

/// One validator-only invariant violation (spec §7 `FeatureMismatch`, §3.2
/// invariant 5 "PC continuity").
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFinding {
    /// A record requiring `feature` appeared in the stream while the
    /// trace's declared feature bitmap has that bit clear (spec §3.2
    /// invariant 6, §8 scenario (vi)).
    FeatureMismatch { index: u64, feature: FeatureBitmap, detail: String },
    /// A non-fault, non-taken-branch instruction's PC did not equal
    /// `pc + opcode_size` of the previous instruction (spec §3.2 invariant
    /// 5). Mirrors the source with no exemption for an `EVENT_PC_TARGET`
    /// delivered by a hardware interrupt (spec §9 Open Question: the
    /// source does not exempt these either).
    PcDiscontinuity { index: u64, expected: Word, actual: Word },
    /// `PROCESS_ID_EXT` appeared while `process_id_present` is clear. The
    /// source accepts this silently (spec §9 Open Question); the validator
    /// still surfaces it, flagged as a stale bit rather than a hard
    /// mismatch, so a caller can choose to warn without failing.
    StaleProcessIdFeatureBit { index: u64 },
    /// A virtual page an instruction's PC or memory accesses touched has
    /// no covering page-table entry anywhere in the stream so far (spec
    /// §3.2 invariant 8 "physical/virtual address agreement").
    UntranslatedAddress { index: u64, vaddr: Word },
}

/// Walks an assembled instruction stream, reporting [`ValidationFinding`]s
/// as they're observed. Does not itself decide whether any finding is
/// fatal; that's left to the caller (spec §7).
pub struct Validator {
    features: FeatureBitmap,
    pc: PcTracker,
    ptes: Option<PteShadow>,
    current_pid: u32,
}

impl Validator {
    /// `initial_pc`/`features` seed from the trace's header (spec §6.1).
    /// Invariant 8's PTE-coverage check is off by default; enable it with
    /// [`Self::with_address_translation_check`].
    pub fn new(features: FeatureBitmap, initial_pc: Word) -> Self {
        Self { features, pc: PcTracker::new(initial_pc), ptes: None, current_pid: 0 }
    }

    /// Turns on invariant 8 ("physical/virtual address agreement") checking:
    /// every PC and memory-access address an instruction touches must be
    /// covered by a `PAGE_TABLE_WALK` observed earlier in the stream. The
    /// validator folds those walk records into its own [`PteShadow`] as it
    /// goes, the same way [`crate::rewrite::Rewriter`] does, rather than
    /// requiring the caller to hand one in. `ignore_pid_mismatch` is the
    /// same tolerance flag `PteShadow` itself takes.
    pub fn with_address_translation_check(mut self, ignore_pid_mismatch: bool) -> Self {
        self.ptes = Some(PteShadow::new(ignore_pid_mismatch));
        self
    }

    /// Checks one instruction against the declared feature bitmap, PC
    /// continuity, and (if enabled) PTE coverage, then folds its page-table
    /// walks and advances the internal PC predictor the same way
    /// [`crate::rewrite::Rewriter::advance_pc`] does.
    pub fn observe(&mut self, inst: &Instruction) -> Vec<ValidationFinding> {
        if let Some(asid) = inst.asid() {
            self.current_pid = asid;
        }
        let mut findings = Vec::new();
        self.check_pc_continuity(inst, &mut findings);
        self.check_feature_honesty(inst, &mut findings);
        self.check_address_translation(inst, &mut findings);
        self.fold_ptes(inst);
        self.advance_pc(inst);
        findings
    }

    fn check_pc_continuity(&self, inst: &Instruction, findings: &mut Vec<ValidationFinding>) {
        if inst.is_change_of_flow() || inst.is_taken_branch() || inst.is_fault() {
            return;
        }
        let expected = self.pc.current();
        if inst.pc() != expected {
            findings.push(ValidationFinding::PcDiscontinuity {
                index: inst.index(),
                expected,
                actual: inst.pc(),
            });
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

    /// Invariant 8: every address this instruction touches must already be
    /// covered by a PTE walked earlier in the stream. Checked against the
    /// shadow as it stood *before* folding this instruction's own walk
    /// records in, so an instruction that only now walks the page covering
    /// its own PC doesn't retroactively exempt itself.
    fn check_address_translation(&mut self, inst: &Instruction, findings: &mut Vec<ValidationFinding>) {
        let pid = self.current_pid;
        let Some(ptes) = self.ptes.as_mut() else { return };
        let mut check = |vaddr: Word, findings: &mut Vec<ValidationFinding>| {
            if ptes.translate_and_mark(pid, vaddr).is_none() {
                findings.push(ValidationFinding::UntranslatedAddress { index: inst.index(), vaddr });
            }
        };
        check(inst.pc(), findings);
        for access in inst.memory_accesses() {
            check(access.vaddr, findings);
            let last_byte = access.vaddr.wrapping_add(access.size.saturating_sub(1) as Word);
            if last_byte != access.vaddr {
                check(last_byte, findings);
            }
        }
    }

    fn fold_ptes(&mut self, inst: &Instruction) {
        let pid = self.current_pid;
        let Some(ptes) = self.ptes.as_mut() else { return };
        for record in inst.orig_records() {
            if let Record::PageTableWalk { va, pa, page_size_log2, first_use_index, entries } = record {
                ptes.update(pid, *va, *pa, *page_size_log2, *first_use_index, entries.clone());
            }
        }
    }

    fn check_feature_honesty(&self, inst: &Instruction, findings: &mut Vec<ValidationFinding>) {
        let mut require = |bit: FeatureBitmap, detail: &str| {
            if !self.features.contains(bit) {
                findings.push(ValidationFinding::FeatureMismatch {
                    index: inst.index(),
                    feature: bit,
                    detail: detail.to_string(),
                });
            }
        };
        for record in inst.orig_records() {
            if let Record::InstMemAccess { paddr, attr, .. } = record {
                if paddr.is_some() {
                    require(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT, "INST_MEM_ACCESS carries a physical address");
                }
                if attr.is_some() {
                    require(FeatureBitmap::DATA_ATTRIBUTE_PRESENT, "INST_MEM_ACCESS carries a data attribute");
                }
            }
            if let Record::InstPcTarget { target_pa: Some(_), .. } = record {
                require(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT, "INST_PC_TARGET carries a physical target");
            }
            if matches!(record, Record::Event { .. }) {
                require(FeatureBitmap::EVENT_PRESENT, "EVENT record present");
            }
            if matches!(record, Record::InstMicroop { .. }) {
                require(FeatureBitmap::MICROOP, "INST_MICROOP record present");
            }
            if matches!(record, Record::PageTableWalk { .. }) {
                require(FeatureBitmap::PTE_EMBEDDED, "PAGE_TABLE_WALK embedded in instruction body");
            }
        }
        if inst.process_id.is_some() && !self.features.contains(FeatureBitmap::PROCESS_ID_PRESENT) {
            findings.push(ValidationFinding::StaleProcessIdFeatureBit { index: inst.index() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use stf_format::{MemAccessType, RecordReader, RecordWriter};

    fn assemble(records: Vec<Record>, features: FeatureBitmap) -> Vec<Instruction> {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "validator test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.params_mut().features = features;
        writer.finalize_header().unwrap();
        for record in records {
            writer.write_record(&record).unwrap();
        }
        let bytes = writer.into_memory_bytes().unwrap();
        let asm = Assembler::new(RecordReader::from_bytes(bytes).unwrap());
        asm.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn flags_physical_address_without_declared_feature() {
        // Hand-build the instruction rather than round-trip it through the
        // codec: the codec itself only ever decodes `paddr` when the
        // feature bit is set, so this exercises the case where a rewriter
        // hands the validator an in-memory `Instruction` assembled under a
        // different (stale) feature bitmap than the one it's checked against.
        let insts = assemble(
            vec![Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }],
            FeatureBitmap::PHYSICAL_ADDRESS_PRESENT,
        );
        let mut with_paddr = insts[0].clone();
        with_paddr.collaborators.push(Record::InstMemAccess {
            vaddr: 0x2000,
            paddr: Some(0x8000_2000),
            size: 8,
            attr: None,
            access_type: MemAccessType::Read,
        });

        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        let findings = validator.observe(&with_paddr);
        assert!(findings.iter().any(|f| matches!(
            f,
            ValidationFinding::FeatureMismatch { feature, .. } if *feature == FeatureBitmap::PHYSICAL_ADDRESS_PRESENT
        )));
    }

    #[test]
    fn clean_trace_reports_nothing() {
        let insts = assemble(
            vec![
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 },
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1004 },
            ],
            FeatureBitmap::empty(),
        );
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        let findings: Vec<_> = insts.iter().flat_map(|i| validator.observe(i)).collect();
        assert!(findings.is_empty());
    }

    #[test]
    fn pc_discontinuity_is_reported_without_change_of_flow() {
        let insts = assemble(
            vec![
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 },
                Record::InstOpcode32 { opcode: 0x13, pc: 0x2000 }, // jumps without a target record
            ],
            FeatureBitmap::empty(),
        );
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        validator.observe(&insts[0]);
        let findings = validator.observe(&insts[1]);
        assert_eq!(
            findings,
            vec![ValidationFinding::PcDiscontinuity { index: 2, expected: 0x1004, actual: 0x2000 }]
        );
    }

    #[test]
    fn interrupt_event_without_a_target_record_is_not_exempted() {
        // Open Question (spec §9): the source does not exempt a hardware
        // interrupt from the PC-discontinuity count unless it actually
        // resolves a target (`EVENT_PC_TARGET`) or is classified as a
        // fault; an interrupt event alone doesn't suppress the check, and
        // neither does this validator.
        let insts = assemble(
            vec![
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 },
                Record::Event { event_type: crate::assembler::instruction::event_kind::INTERRUPT, data: vec![] },
                Record::InstOpcode32 { opcode: 0x13, pc: 0x2000 }, // jumped, but no target record attached
            ],
            FeatureBitmap::empty(),
        );
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        validator.observe(&insts[0]);
        let findings = validator.observe(&insts[1]);
        assert_eq!(
            findings,
            vec![ValidationFinding::PcDiscontinuity { index: 2, expected: 0x1004, actual: 0x2000 }]
        );
    }

    #[test]
    fn stale_process_id_feature_bit_is_flagged_not_fatal() {
        let mut writer = RecordWriter::in_memory();
        writer.params_mut().append_trace_info(1, "1.0", "pid test");
        writer.params_mut().initial_pc = Some(0x1000);
        writer.params_mut().process_id = Some((1, 2, 3, 4));
        writer.finalize_header().unwrap();
        writer.write_record(&Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }).unwrap();
        let bytes = writer.into_memory_bytes().unwrap();
        let asm = Assembler::new(RecordReader::from_bytes(bytes).unwrap());
        let insts: Vec<_> = asm.map(|r| r.unwrap()).collect();

        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        let findings = validator.observe(&insts[0]);
        assert_eq!(findings, vec![ValidationFinding::StaleProcessIdFeatureBit { index: 1 }]);
    }

    #[test]
    fn address_translation_check_is_off_by_default() {
        // No PTE ever walks 0x1000, but without opting in via
        // `with_address_translation_check` the validator stays silent.
        let insts = assemble(vec![Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }], FeatureBitmap::empty());
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000);
        assert!(validator.observe(&insts[0]).is_empty());
    }

    #[test]
    fn untranslated_pc_is_flagged_once_enabled() {
        let insts = assemble(vec![Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 }], FeatureBitmap::empty());
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000).with_address_translation_check(false);
        let findings = validator.observe(&insts[0]);
        assert_eq!(findings, vec![ValidationFinding::UntranslatedAddress { index: 1, vaddr: 0x1000 }]);
    }

    #[test]
    fn a_walked_page_clears_later_instructions_but_not_the_walking_one() {
        // The walk record is a collaborator of instruction 1, so it's only
        // folded into the shadow *after* instruction 1 itself is checked —
        // it doesn't retroactively cover its own carrier.
        let insts = assemble(
            vec![
                Record::PageTableWalk { va: 0x1000, pa: 0x8000_1000, page_size_log2: 12, first_use_index: 0, entries: vec![1] },
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1000 },
                Record::InstOpcode32 { opcode: 0x13, pc: 0x1004 },
            ],
            FeatureBitmap::empty(),
        );
        let mut validator = Validator::new(FeatureBitmap::empty(), 0x1000).with_address_translation_check(false);
        let first = validator.observe(&insts[0]);
        let second = validator.observe(&insts[1]);
        assert_eq!(first, vec![ValidationFinding::UntranslatedAddress { index: 1, vaddr: 0x1000 }]);
        assert!(second.is_empty(), "instruction 2 falls within the now-folded page: {second:?}");
    }
}
