//! Header protocol (spec §6.1): the fixed sequence of records that must
//! precede `END_HEADER`, the mandatory/optional rules around them, and the
//! convenience `copy_header` operation the rewriter facade builds on.

use stf_types::{FeatureBitmap, Iem, Isa, RegisterId, Word};

use crate::error::{FormatError, Result};
use crate::record::{OperandType, Record};

/// An initial register value recorded in the header (spec §6.1 item 10):
/// one `INST_REG(state)` record per live register, in register-id order.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialRegisterState {
    pub reg_id: RegisterId,
    pub values: Vec<u64>,
}

/// An initial page-table entry recorded in the header (spec §6.1 item 11).
#[derive(Debug, Clone, PartialEq)]
pub struct InitialPte {
    pub va: Word,
    pub pa: Word,
    pub page_size_log2: u32,
    pub first_use_index: u64,
    pub entries: Vec<u64>,
}

/// The header fields of a trace, decoded from the record stream up to and
/// including `END_HEADER`. Mirrors the role `ConsensusParameters` plays for
/// `fuel-tx`: a typed, validated view assembled from wire records rather
/// than the wire records themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceParameters {
    pub version: (u16, u16),
    pub isa: Isa,
    pub iem: Iem,
    pub vlen: Option<u16>,
    pub trace_info: Vec<(u8, String, String)>,
    pub features: FeatureBitmap,
    /// Initial PC (spec §6.1 item 8, `FORCE_PC`). Mandatory on the wire,
    /// but `None` until observed so a partially-read header can be told
    /// apart from a genuinely zero initial PC.
    pub initial_pc: Option<Word>,
    pub process_id: Option<(u32, u32, u32, u32)>,
    pub initial_reg_state: Vec<InitialRegisterState>,
    pub initial_ptes: Vec<InitialPte>,
    pub leading_comments: Vec<String>,
}

impl Default for TraceParameters {
    fn default() -> Self {
        Self {
            version: (0, 1),
            isa: Isa::RiscV,
            iem: Iem::Rv64,
            vlen: None,
            trace_info: Vec::new(),
            features: FeatureBitmap::empty(),
            initial_pc: None,
            process_id: None,
            initial_reg_state: Vec::new(),
            initial_ptes: Vec::new(),
            leading_comments: Vec::new(),
        }
    }
}

impl TraceParameters {
    /// Folds one header-phase record into the parameters being assembled.
    /// Returns an error for anything that isn't legal before `END_HEADER`
    /// (spec §6.1); the caller is expected to stop folding once it sees
    /// `EndHeader` return `Ok(true)`.
    ///
    /// The first `FORCE_PC` observed is taken as the initial PC (spec §6.1
    /// item 8); `INST_REG` records in header phase are always `state`
    /// snapshots (spec §6.1 item 10) and any other operand type is a
    /// header error.
    pub fn observe(&mut self, record: &Record) -> Result<bool> {
        match record {
            Record::Identifier => {}
            Record::Version { major, minor } => self.version = (*major, *minor),
            Record::Isa { isa } => self.isa = *isa,
            Record::InstIem { iem } => self.iem = *iem,
            Record::VlenConfig { vlen } => self.vlen = Some(*vlen),
            Record::TraceInfo { generator_id, version, comment } => {
                self.trace_info.push((*generator_id, version.clone(), comment.clone()));
            }
            Record::TraceInfoFeature { features } => self.features = *features,
            Record::ForcePc { pc } => self.initial_pc = Some(*pc),
            Record::ProcessIdExt { hwtid, tgid, tid, asid } => {
                self.process_id = Some((*hwtid, *tgid, *tid, *asid));
            }
            Record::InstReg { operand_type: OperandType::State, reg_id, values } => {
                self.initial_reg_state.push(InitialRegisterState {
                    reg_id: *reg_id,
                    values: values.clone(),
                });
            }
            Record::InstReg { operand_type, .. } => {
                return Err(FormatError::Header(format!(
                    "INST_REG({operand_type:?}) is not legal before END_HEADER; only state snapshots are"
                )))
            }
            Record::PageTableWalk { va, pa, page_size_log2, first_use_index, entries } => {
                self.initial_ptes.push(InitialPte {
                    va: *va,
                    pa: *pa,
                    page_size_log2: *page_size_log2,
                    first_use_index: *first_use_index,
                    entries: entries.clone(),
                });
            }
            Record::Comment { text } => self.leading_comments.push(text.clone()),
            Record::EndHeader => return Ok(true),
            other => {
                return Err(FormatError::Header(format!(
                    "record {other:?} is not legal before END_HEADER"
                )))
            }
        }
        Ok(false)
    }

    /// Finalizes this header: checks the mandatory records (`IDENTIFIER`,
    /// `VERSION`, `TRACE_INFO`, `FORCE_PC`, spec §6.1) were observed.
    pub fn validate(&self) -> Result<()> {
        if self.trace_info.is_empty() {
            return Err(FormatError::Header(
                "no TRACE_INFO record observed; a trace must carry at least one generator identity".into(),
            ));
        }
        if self.initial_pc.is_none() {
            return Err(FormatError::Header(
                "no FORCE_PC record observed; a trace must carry an initial PC".into(),
            ));
        }
        Ok(())
    }

    /// Emits this header as a fully-ordered record sequence, terminated by
    /// `END_HEADER` (spec §6.1 canonical order). Used by the writer and by
    /// `copy_header`.
    pub fn to_records(&self) -> Vec<Record> {
        let mut records = vec![
            Record::Identifier,
            Record::Version { major: self.version.0, minor: self.version.1 },
            Record::Isa { isa: self.isa },
            Record::InstIem { iem: self.iem },
        ];
        if let Some(vlen) = self.vlen {
            records.push(Record::VlenConfig { vlen });
        }
        for (generator_id, version, comment) in &self.trace_info {
            records.push(Record::TraceInfo {
                generator_id: *generator_id,
                version: version.clone(),
                comment: comment.clone(),
            });
        }
        records.push(Record::TraceInfoFeature { features: self.features });
        records.push(Record::ForcePc { pc: self.initial_pc.unwrap_or(0) });
        if let Some((hwtid, tgid, tid, asid)) = self.process_id {
            records.push(Record::ProcessIdExt { hwtid, tgid, tid, asid });
        }
        for reg in &self.initial_reg_state {
            records.push(Record::InstReg {
                operand_type: OperandType::State,
                reg_id: reg.reg_id,
                values: reg.values.clone(),
            });
        }
        for pte in &self.initial_ptes {
            records.push(Record::PageTableWalk {
                va: pte.va,
                pa: pte.pa,
                page_size_log2: pte.page_size_log2,
                first_use_index: pte.first_use_index,
                entries: pte.entries.clone(),
            });
        }
        for comment in &self.leading_comments {
            records.push(Record::Comment { text: comment.clone() });
        }
        records.push(Record::EndHeader);
        records
    }

    /// Clears `bit`, the spec §4.3 "header copy" primitive a rewriter uses
    /// to turn off an optional record kind it intends to drop. Only legal
    /// for bits [`FeatureBitmap::TOGGLEABLE`]; structural bits panic rather
    /// than silently doing nothing, since a caller that reaches for this on
    /// a structural bit has misunderstood what it controls.
    pub fn disable_feature(&mut self, bit: FeatureBitmap) {
        assert!(
            self.features.can_disable(bit),
            "{bit:?} is not a toggleable feature bit"
        );
        self.features.remove(bit);
    }

    /// Appends a `TRACE_INFO` entry recording a rewriter's own pass over the
    /// trace (spec §4.3), preserving every prior entry.
    pub fn append_trace_info(&mut self, generator_id: u8, version: impl Into<String>, comment: impl Into<String>) {
        self.trace_info.push((generator_id, version.into(), comment.into()));
    }

    /// Replaces the initial register-state snapshot (used by the rewriter
    /// facade when flushing shadow register state into a new header,
    /// spec §4.8 step 3). Registers must already be in ascending id order.
    pub fn set_initial_reg_state(&mut self, state: Vec<InitialRegisterState>) {
        self.initial_reg_state = state;
    }

    /// Replaces the initial PTE set (spec §4.8 step 3 "dump-all" mode).
    pub fn set_initial_ptes(&mut self, ptes: Vec<InitialPte>) {
        self.initial_ptes = ptes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_mandatory_fields() -> TraceParameters {
        let mut params = TraceParameters::default();
        params.append_trace_info(1, "1.0", "unit test");
        params.initial_pc = Some(0x1000);
        params
    }

    #[test]
    fn observe_rejects_body_record_before_end_header() {
        let mut params = TraceParameters::default();
        let err = params
            .observe(&Record::InstOpcode16 { opcode: 0, pc: 0 })
            .unwrap_err();
        assert!(matches!(err, FormatError::Header(_)));
    }

    #[test]
    fn observe_rejects_source_operand_before_end_header() {
        let mut params = TraceParameters::default();
        let err = params
            .observe(&Record::InstReg { operand_type: OperandType::Source, reg_id: 1, values: vec![] })
            .unwrap_err();
        assert!(matches!(err, FormatError::Header(_)));
    }

    #[test]
    fn to_records_round_trips_through_observe() {
        let mut params = with_mandatory_fields();
        params.features = FeatureBitmap::PHYSICAL_ADDRESS_PRESENT;
        params.set_initial_reg_state(vec![InitialRegisterState { reg_id: 3, values: vec![0x30] }]);

        let mut rebuilt = TraceParameters::default();
        for record in params.to_records() {
            if rebuilt.observe(&record).unwrap() {
                break;
            }
        }
        assert_eq!(rebuilt.version, params.version);
        assert_eq!(rebuilt.trace_info, params.trace_info);
        assert_eq!(rebuilt.features, params.features);
        assert_eq!(rebuilt.initial_pc, params.initial_pc);
        assert_eq!(rebuilt.initial_reg_state, params.initial_reg_state);
    }

    #[test]
    fn validate_requires_trace_info() {
        let params = TraceParameters::default();
        assert!(params.validate().is_err());
    }

    #[test]
    fn validate_requires_initial_pc() {
        let mut params = TraceParameters::default();
        params.append_trace_info(1, "1.0", "unit test");
        assert!(params.validate().is_err());
    }

    #[test]
    fn validate_accepts_mandatory_fields() {
        assert!(with_mandatory_fields().validate().is_ok());
    }
}
