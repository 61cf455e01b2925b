//! The immutable `Instruction` value the assembler emits (spec §3.1/§4.5).

use stf_types::{InstIndex, RegisterId, Word};

use stf_decode::DecodeInfo;
use stf_format::{Descriptor, MemAccessType, OperandType, Record};

/// A decoded memory access paired with its content, if the content record
/// was present in the stream (spec §4.5 "access+content pairs, zipped").
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAccess {
    pub vaddr: Word,
    pub paddr: Option<Word>,
    pub size: u16,
    pub attr: Option<u8>,
    pub access_type: MemAccessType,
    pub content: Option<Vec<u64>>,
}

/// A register operand observed on an instruction (spec §3.3 `INST_REG`).
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterOperand {
    pub reg_id: RegisterId,
    pub values: Vec<u64>,
}

/// Toolkit-level event classification. The wire format carries only an
/// opaque `u32 event_type` (spec §6.3); `original_source/` does not carry
/// a numeric registry for these in the files retained in this pack, so
/// this is a documented convention rather than a value mirrored from the
/// source, recorded as an Open Question decision.
pub mod event_kind {
    pub const FAULT: u32 = 0x0;
    pub const INTERRUPT: u32 = 0x1;
    pub const MODE_CHANGE_TO_USER: u32 = 0x2;
    pub const MODE_CHANGE_FROM_USER: u32 = 0x3;
}

/// The trailing target record that resolved this instruction's branch
/// target, kept distinct by wire kind so a rewriter can replay the exact
/// record it observed (spec §4.5: `INST_PC_TARGET`/`EVENT_PC_TARGET` both
/// trail the opcode they belong to, rather than preceding it).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetRecord {
    Pc { target_va: Word, target_pa: Option<Word> },
    Event { target: Word },
}

/// One opcode plus every collaborator record that preceded it since the
/// last opcode (spec §3.1 "Instruction unit"). Immutable once the
/// assembler emits it (spec §3.4).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub(crate) index: InstIndex,
    pub(crate) pc: Word,
    pub(crate) opcode: u32,
    pub(crate) opcode_size: u8,
    pub(crate) decode: DecodeInfo,
    pub(crate) is_change_of_flow: bool,
    pub(crate) forced_pc: Option<Word>,
    pub(crate) branch_target: Option<TargetRecord>,
    pub(crate) process_id: Option<(u32, u32, u32, u32)>,
    /// Every collaborator record, in stream order, exactly as observed.
    /// This is what a rewriter replays verbatim (spec §4.5 `orig_records`).
    pub(crate) collaborators: Vec<Record>,
}

impl Instruction {
    pub fn index(&self) -> InstIndex {
        self.index
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    pub fn opcode_size(&self) -> u8 {
        self.opcode_size
    }

    pub fn decode_info(&self) -> &DecodeInfo {
        &self.decode
    }

    pub fn mnemonic(&self) -> &str {
        &self.decode.mnemonic
    }

    pub fn disassembly(&self) -> &str {
        &self.decode.disassembly
    }

    /// Whether this instruction's PC differs from a simple fallthrough of
    /// the previous one (spec §3.2 invariant 5 "change-of-flow"): true
    /// when a preceding `FORCE_PC` marked it, or an `EVENT` in its
    /// collaborators delivered a target.
    pub fn is_change_of_flow(&self) -> bool {
        self.is_change_of_flow
    }

    pub fn forced_pc(&self) -> Option<Word> {
        self.forced_pc
    }

    /// A target was resolved for this instruction via `INST_PC_TARGET`
    /// (spec §8 scenario (i): instruction 3 "is a taken branch with target
    /// 0x2000"). True for any instruction with a recorded target,
    /// including unconditional jumps, matching the literal example.
    pub fn is_taken_branch(&self) -> bool {
        self.branch_target.is_some()
    }

    pub fn branch_target(&self) -> Option<Word> {
        match self.branch_target {
            Some(TargetRecord::Pc { target_va, .. }) => Some(target_va),
            Some(TargetRecord::Event { target }) => Some(target),
            None => None,
        }
    }

    pub fn branch_target_physical(&self) -> Option<Word> {
        match self.branch_target {
            Some(TargetRecord::Pc { target_pa, .. }) => target_pa,
            _ => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.events().any(|(ty, _)| *ty == event_kind::FAULT)
    }

    pub fn is_interrupt(&self) -> bool {
        self.events().any(|(ty, _)| *ty == event_kind::INTERRUPT)
    }

    pub fn is_change_to_user_mode(&self) -> bool {
        self.events().any(|(ty, _)| *ty == event_kind::MODE_CHANGE_TO_USER)
    }

    pub fn is_change_from_user_mode(&self) -> bool {
        self.events().any(|(ty, _)| *ty == event_kind::MODE_CHANGE_FROM_USER)
    }

    pub fn source_operands(&self) -> Vec<RegisterOperand> {
        self.reg_operands(OperandType::Source)
    }

    pub fn dest_operands(&self) -> Vec<RegisterOperand> {
        self.reg_operands(OperandType::Dest)
    }

    pub fn register_states(&self) -> Vec<RegisterOperand> {
        self.reg_operands(OperandType::State)
    }

    fn reg_operands(&self, kind: OperandType) -> Vec<RegisterOperand> {
        self.collaborators
            .iter()
            .filter_map(|r| match r {
                Record::InstReg { operand_type, reg_id, values } if *operand_type == kind => {
                    Some(RegisterOperand { reg_id: *reg_id, values: values.clone() })
                }
                _ => None,
            })
            .collect()
    }

    /// Memory accesses paired with their content record, in stream order
    /// (spec §4.5 "access+content pairs, zipped").
    pub fn memory_accesses(&self) -> Vec<MemoryAccess> {
        let mut accesses = Vec::new();
        let mut iter = self.collaborators.iter().peekable();
        while let Some(record) = iter.next() {
            if let Record::InstMemAccess { vaddr, paddr, size, attr, access_type } = record {
                let content = match iter.peek() {
                    Some(Record::InstMemContent { values }) => {
                        let values = values.clone();
                        iter.next();
                        Some(values)
                    }
                    _ => None,
                };
                accesses.push(MemoryAccess {
                    vaddr: *vaddr,
                    paddr: *paddr,
                    size: *size,
                    attr: *attr,
                    access_type: *access_type,
                    content,
                });
            }
        }
        accesses
    }

    pub fn memory_reads(&self) -> Vec<MemoryAccess> {
        self.memory_accesses()
            .into_iter()
            .filter(|m| m.access_type == MemAccessType::Read)
            .collect()
    }

    pub fn memory_writes(&self) -> Vec<MemoryAccess> {
        self.memory_accesses()
            .into_iter()
            .filter(|m| m.access_type == MemAccessType::Write)
            .collect()
    }

    pub fn events(&self) -> impl Iterator<Item = (&u32, &Vec<u64>)> {
        self.collaborators.iter().filter_map(|r| match r {
            Record::Event { event_type, data } => Some((event_type, data)),
            _ => None,
        })
    }

    pub fn embedded_ptes(&self) -> impl Iterator<Item = &Record> {
        self.collaborators
            .iter()
            .filter(|r| r.descriptor() == Descriptor::PageTableWalk)
    }

    pub fn micro_ops(&self) -> impl Iterator<Item = &Record> {
        self.collaborators
            .iter()
            .filter(|r| r.descriptor() == Descriptor::InstMicroop)
    }

    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.collaborators.iter().filter_map(|r| match r {
            Record::Comment { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn ready_regs(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.collaborators.iter().filter_map(|r| match r {
            Record::InstReadyReg { reg_id } => Some(*reg_id),
            _ => None,
        })
    }

    pub fn tid(&self) -> Option<u32> {
        self.process_id.map(|(_, _, tid, _)| tid)
    }

    pub fn tgid(&self) -> Option<u32> {
        self.process_id.map(|(_, tgid, _, _)| tgid)
    }

    pub fn asid(&self) -> Option<u32> {
        self.process_id.map(|(_, _, _, asid)| asid)
    }

    pub fn hwtid(&self) -> Option<u32> {
        self.process_id.map(|(hwtid, _, _, _)| hwtid)
    }

    /// The raw collaborator records in stream order, for rewriters that
    /// need to replay an instruction's body verbatim (spec §4.5
    /// `orig_records`).
    pub fn orig_records(&self) -> &[Record] {
        &self.collaborators
    }

    /// The opcode terminator record this instruction was assembled from.
    pub fn opcode_record(&self) -> Record {
        if self.opcode_size == 2 {
            Record::InstOpcode16 { opcode: self.opcode as u16, pc: self.pc }
        } else {
            Record::InstOpcode32 { opcode: self.opcode, pc: self.pc }
        }
    }

    /// Reconstructs the exact wire-order record sequence this instruction
    /// was assembled from: its collaborators, its opcode terminator, and
    /// (if present) the trailing target record, in that order. A rewriter
    /// passing an instruction through unmodified writes exactly this (spec
    /// §8 property 2 "pass-through identity").
    pub fn to_wire_records(&self) -> Vec<Record> {
        let mut records = self.collaborators.clone();
        records.push(self.opcode_record());
        match self.branch_target {
            Some(TargetRecord::Pc { target_va, target_pa }) => {
                records.push(Record::InstPcTarget { target_va, target_pa })
            }
            Some(TargetRecord::Event { target }) => records.push(Record::EventPcTarget { target }),
            None => {}
        }
        records
    }
}
