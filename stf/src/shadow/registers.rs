//! Shadow register file (spec §4.7): last-written value per register.

use std::collections::BTreeMap;

use stf_format::{InitialRegisterState, OperandType, Record};
use stf_types::{RegisterId, REG_X0};

/// A register's last-written value: a scalar, or a vector whose length is
/// `vlen / 64` (spec §3.2 glossary "Shadow register file").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarOrVector {
    Scalar(u64),
    Vector(Vec<u64>),
}

impl ScalarOrVector {
    fn from_values(values: &[u64]) -> Self {
        if values.len() == 1 {
            Self::Scalar(values[0])
        } else {
            Self::Vector(values.to_vec())
        }
    }

    fn as_values(&self) -> Vec<u64> {
        match self {
            Self::Scalar(v) => vec![*v],
            Self::Vector(v) => v.clone(),
        }
    }
}

/// Tracks the last-written value of every live register, in ascending
/// register-id order for deterministic `write_reg_state` output.
#[derive(Debug, Clone, Default)]
pub struct ShadowRegisterFile {
    values: BTreeMap<RegisterId, ScalarOrVector>,
}

impl ShadowRegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the shadow from a header's initial register-state snapshot
    /// (spec §6.1 item 10).
    pub fn from_initial_state(initial: &[InitialRegisterState]) -> Self {
        let mut shadow = Self::new();
        for reg in initial {
            shadow.values.insert(reg.reg_id, ScalarOrVector::from_values(&reg.values));
        }
        shadow
    }

    /// Folds one collaborator record into the shadow: dest-operand and
    /// state records update it, everything else is ignored (spec §4.7
    /// "Updated by dest-operand and state records in order").
    pub fn observe(&mut self, record: &Record) {
        if let Record::InstReg { operand_type, reg_id, values } = record {
            if matches!(operand_type, OperandType::Dest | OperandType::State) {
                self.set(*reg_id, values);
            }
        }
    }

    pub fn set(&mut self, reg_id: RegisterId, values: &[u64]) {
        if reg_id == REG_X0 {
            return; // x0 is hardwired to zero and never actually shadowed
        }
        self.values.insert(reg_id, ScalarOrVector::from_values(values));
    }

    /// x0 always reads zero (spec §8 invariant "x0 reads always yield 0"),
    /// whether or not it has ever been assigned.
    pub fn get(&self, reg_id: RegisterId) -> Option<ScalarOrVector> {
        if reg_id == REG_X0 {
            return Some(ScalarOrVector::Scalar(0));
        }
        self.values.get(&reg_id).cloned()
    }

    /// Clears all shadowed state (spec §4.4 "Reset on reader seek").
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Snapshots the shadow as a header-ready `InitialRegisterState` list,
    /// in ascending register-id order (spec §4.7 `write_reg_state`).
    pub fn to_initial_state(&self) -> Vec<InitialRegisterState> {
        self.values
            .iter()
            .map(|(reg_id, v)| InitialRegisterState { reg_id: *reg_id, values: v.as_values() })
            .collect()
    }

    /// Builds the `INST_REG(STATE)` records `write_reg_state` emits, in the
    /// same deterministic order as [`Self::to_initial_state`].
    pub fn to_state_records(&self) -> Vec<Record> {
        self.values
            .iter()
            .map(|(reg_id, v)| Record::InstReg {
                operand_type: OperandType::State,
                reg_id: *reg_id,
                values: v.as_values(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x0_always_reads_zero() {
        let mut shadow = ShadowRegisterFile::new();
        shadow.set(REG_X0, &[42]);
        assert_eq!(shadow.get(REG_X0), Some(ScalarOrVector::Scalar(0)));
    }

    #[test]
    fn dest_operand_updates_shadow() {
        let mut shadow = ShadowRegisterFile::new();
        shadow.observe(&Record::InstReg { operand_type: OperandType::Dest, reg_id: 5, values: vec![99] });
        assert_eq!(shadow.get(5), Some(ScalarOrVector::Scalar(99)));
    }

    #[test]
    fn source_operand_does_not_update_shadow() {
        let mut shadow = ShadowRegisterFile::new();
        shadow.observe(&Record::InstReg { operand_type: OperandType::Source, reg_id: 5, values: vec![99] });
        assert_eq!(shadow.get(5), None);
    }

    #[test]
    fn to_state_records_is_sorted_by_register_id() {
        let mut shadow = ShadowRegisterFile::new();
        shadow.set(9, &[1]);
        shadow.set(2, &[2]);
        let records = shadow.to_state_records();
        let ids: Vec<_> = records
            .iter()
            .map(|r| match r {
                Record::InstReg { reg_id, .. } => *reg_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn reset_clears_shadow() {
        let mut shadow = ShadowRegisterFile::new();
        shadow.set(1, &[1]);
        shadow.reset();
        assert_eq!(shadow.get(1), None);
    }
}
