//! The record payloads (spec §3.3/§6.3).
//!
//! The teacher workspace models its on-wire tagged unions (`Receipt`,
//! `Input`, `Output`) as a single Rust `enum` with one variant per wire kind,
//! dispatched through a small `*Repr` enum purely for the tag byte
//! (`receipt_repr.rs`). We follow the same shape here: [`Record`] is the
//! value type consumers see; [`crate::descriptor::Descriptor`] is the tag.
//! Encoding/decoding is hand-written per variant — the format has no
//! reflection (spec §4.2) — mirroring the manual `io::Read`/`io::Write` impl
//! bodies in `receipt_std.rs`, simplified from fixed-offset layouts to
//! sequential field writes since most STF records are variable-length.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use stf_types::{Error as CodecError, FeatureBitmap, Iem, Isa, RegisterId, Word};

use crate::descriptor::Descriptor;
use crate::error::{FormatError, Result};
use crate::strings::{read_string, write_string};

/// Kind of an `INST_REG` record: whether the register is a source operand,
/// a destination operand, or a full state snapshot (used in the header and
/// by `write_reg_state`, spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    Source,
    Dest,
    State,
}

impl OperandType {
    fn to_byte(self) -> u8 {
        match self {
            Self::Source => 0,
            Self::Dest => 1,
            Self::State => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Source,
            1 => Self::Dest,
            2 => Self::State,
            other => return Err(FormatError::CorruptStream(CodecError::UnknownDiscriminant(other))),
        })
    }
}

/// Direction of a memory or bus-master access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccessType {
    Read,
    Write,
}

impl MemAccessType {
    fn to_byte(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Read,
            1 => Self::Write,
            other => return Err(FormatError::CorruptStream(CodecError::UnknownDiscriminant(other))),
        })
    }
}

/// A single tagged record (spec §3.1). Decoding a record requires knowing
/// the active feature bitmap, since several payloads carry conditional
/// fields (`physical_address_present`, `data_attribute_present`, ...); the
/// bitmap is threaded through every `encode`/`decode` call rather than
/// stashed as hidden state, keeping the codec free of implicit context.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Identifier,
    Version { major: u16, minor: u16 },
    Isa { isa: Isa },
    InstIem { iem: Iem },
    VlenConfig { vlen: u16 },
    TraceInfo { generator_id: u8, version: String, comment: String },
    TraceInfoFeature { features: FeatureBitmap },
    EndHeader,

    ProcessIdExt { hwtid: u32, tgid: u32, tid: u32, asid: u32 },
    ForcePc { pc: Word },
    Comment { text: String },

    InstReg { operand_type: OperandType, reg_id: RegisterId, values: Vec<u64> },
    InstReadyReg { reg_id: RegisterId },
    InstMemAccess {
        vaddr: Word,
        paddr: Option<Word>,
        size: u16,
        attr: Option<u8>,
        access_type: MemAccessType,
    },
    InstMemContent { values: Vec<u64> },
    InstPcTarget { target_va: Word, target_pa: Option<Word> },
    InstMicroop { size: u8, opcode_bytes: Vec<u8> },
    Event { event_type: u32, data: Vec<u64> },
    EventPcTarget { target: Word },
    PageTableWalk {
        va: Word,
        pa: Word,
        page_size_log2: u32,
        first_use_index: u64,
        entries: Vec<u64>,
    },
    BusMasterAccess {
        vaddr: Word,
        paddr: Option<Word>,
        size: u16,
        access_type: MemAccessType,
    },
    BusMasterContent { values: Vec<u64> },

    InstOpcode16 { opcode: u16, pc: Word },
    InstOpcode32 { opcode: u32, pc: Word },
}

impl Record {
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::from(self)
    }

    /// `true` for `INST_OPCODE16`/`INST_OPCODE32`, the only records that
    /// terminate an instruction unit (spec §3.2 invariant 2).
    pub fn is_opcode(&self) -> bool {
        matches!(self, Self::InstOpcode16 { .. } | Self::InstOpcode32 { .. })
    }

    /// Opcode size implied by the terminator variant (spec §3.2 invariant
    /// 4): `2` for a 16-bit (compressed) opcode, `4` for a 32-bit opcode.
    pub fn opcode_size(&self) -> Option<u8> {
        match self {
            Self::InstOpcode16 { .. } => Some(2),
            Self::InstOpcode32 { .. } => Some(4),
            _ => None,
        }
    }

    /// Writes the descriptor byte followed by the record body.
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W, features: FeatureBitmap) -> Result<()> {
        w.write_u8(self.descriptor().as_byte())?;
        self.encode_body(w, features)
    }

    fn encode_body<W: Write + ?Sized>(&self, w: &mut W, features: FeatureBitmap) -> Result<()> {
        match self {
            Record::Identifier => w.write_all(b"STF\0")?,
            Record::Version { major, minor } => {
                w.write_u16::<LittleEndian>(*major)?;
                w.write_u16::<LittleEndian>(*minor)?;
            }
            Record::Isa { isa } => w.write_u8(isa.to_byte())?,
            Record::InstIem { iem } => w.write_u8(iem.to_byte())?,
            Record::VlenConfig { vlen } => w.write_u16::<LittleEndian>(*vlen)?,
            Record::TraceInfo { generator_id, version, comment } => {
                w.write_u8(*generator_id)?;
                write_string(w, version)?;
                write_string(w, comment)?;
            }
            Record::TraceInfoFeature { features } => w.write_u64::<LittleEndian>(features.bits())?,
            Record::EndHeader => {}

            Record::ProcessIdExt { hwtid, tgid, tid, asid } => {
                w.write_u32::<LittleEndian>(*hwtid)?;
                w.write_u32::<LittleEndian>(*tgid)?;
                w.write_u32::<LittleEndian>(*tid)?;
                w.write_u32::<LittleEndian>(*asid)?;
            }
            Record::ForcePc { pc } => w.write_u64::<LittleEndian>(*pc)?,
            Record::Comment { text } => write_string(w, text)?,

            Record::InstReg { operand_type, reg_id, values } => {
                w.write_u8(operand_type.to_byte())?;
                w.write_u16::<LittleEndian>(*reg_id)?;
                let emit_values = matches!(operand_type, OperandType::State)
                    || features.contains(FeatureBitmap::OPERAND_VALUE_PRESENT);
                let values_to_write: &[u64] = if emit_values { values } else { &[] };
                w.write_u16::<LittleEndian>(values_to_write.len() as u16)?;
                for v in values_to_write {
                    w.write_u64::<LittleEndian>(*v)?;
                }
            }
            Record::InstReadyReg { reg_id } => w.write_u16::<LittleEndian>(*reg_id)?,
            Record::InstMemAccess { vaddr, paddr, size, attr, access_type } => {
                w.write_u64::<LittleEndian>(*vaddr)?;
                if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    w.write_u64::<LittleEndian>(paddr.unwrap_or(0))?;
                }
                w.write_u16::<LittleEndian>(*size)?;
                if features.contains(FeatureBitmap::DATA_ATTRIBUTE_PRESENT) {
                    w.write_u8(attr.unwrap_or(0))?;
                }
                w.write_u8(access_type.to_byte())?;
            }
            Record::InstMemContent { values } => {
                w.write_u16::<LittleEndian>(values.len() as u16)?;
                for v in values {
                    w.write_u64::<LittleEndian>(*v)?;
                }
            }
            Record::InstPcTarget { target_va, target_pa } => {
                w.write_u64::<LittleEndian>(*target_va)?;
                if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    w.write_u64::<LittleEndian>(target_pa.unwrap_or(0))?;
                }
            }
            Record::InstMicroop { size, opcode_bytes } => {
                w.write_u8(*size)?;
                w.write_all(opcode_bytes)?;
            }
            Record::Event { event_type, data } => {
                w.write_u32::<LittleEndian>(*event_type)?;
                w.write_u16::<LittleEndian>(data.len() as u16)?;
                for v in data {
                    w.write_u64::<LittleEndian>(*v)?;
                }
            }
            Record::EventPcTarget { target } => w.write_u64::<LittleEndian>(*target)?,
            Record::PageTableWalk { va, pa, page_size_log2, first_use_index, entries } => {
                w.write_u64::<LittleEndian>(*va)?;
                w.write_u64::<LittleEndian>(*pa)?;
                w.write_u32::<LittleEndian>(*page_size_log2)?;
                w.write_u64::<LittleEndian>(*first_use_index)?;
                w.write_u16::<LittleEndian>(entries.len() as u16)?;
                for e in entries {
                    w.write_u64::<LittleEndian>(*e)?;
                }
            }
            Record::BusMasterAccess { vaddr, paddr, size, access_type } => {
                w.write_u64::<LittleEndian>(*vaddr)?;
                if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    w.write_u64::<LittleEndian>(paddr.unwrap_or(0))?;
                }
                w.write_u16::<LittleEndian>(*size)?;
                w.write_u8(access_type.to_byte())?;
            }
            Record::BusMasterContent { values } => {
                w.write_u16::<LittleEndian>(values.len() as u16)?;
                for v in values {
                    w.write_u64::<LittleEndian>(*v)?;
                }
            }
            Record::InstOpcode16 { opcode, pc } => {
                w.write_u16::<LittleEndian>(*opcode)?;
                w.write_u64::<LittleEndian>(*pc)?;
            }
            Record::InstOpcode32 { opcode, pc } => {
                w.write_u32::<LittleEndian>(*opcode)?;
                w.write_u64::<LittleEndian>(*pc)?;
            }
        }
        Ok(())
    }

    /// Decodes the body of `descriptor` from `r`. The descriptor byte
    /// itself must already have been consumed by the caller (the reader
    /// reads it first so it can distinguish a clean EOF from a record —
    /// spec §7).
    pub fn decode_body<R: Read + ?Sized>(
        descriptor: Descriptor,
        r: &mut R,
        features: FeatureBitmap,
    ) -> Result<Record> {
        let eof = || FormatError::CorruptStream(CodecError::UnexpectedEof);
        Ok(match descriptor {
            Descriptor::Identifier => {
                let mut magic = [0u8; 4];
                r.read_exact(&mut magic).map_err(|_| eof())?;
                if &magic != b"STF\0" {
                    return Err(FormatError::Header(format!(
                        "bad magic bytes {magic:?}, expected STF\\0"
                    )));
                }
                Record::Identifier
            }
            Descriptor::Version => Record::Version {
                major: r.read_u16::<LittleEndian>().map_err(|_| eof())?,
                minor: r.read_u16::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::Isa => Record::Isa {
                isa: Isa::from_byte(r.read_u8().map_err(|_| eof())?),
            },
            Descriptor::InstIem => Record::InstIem {
                iem: Iem::from_byte(r.read_u8().map_err(|_| eof())?)
                    .map_err(FormatError::CorruptStream)?,
            },
            Descriptor::VlenConfig => Record::VlenConfig {
                vlen: r.read_u16::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::TraceInfo => Record::TraceInfo {
                generator_id: r.read_u8().map_err(|_| eof())?,
                version: read_string(r)?,
                comment: read_string(r)?,
            },
            Descriptor::TraceInfoFeature => Record::TraceInfoFeature {
                features: FeatureBitmap::from_bits_truncate(
                    r.read_u64::<LittleEndian>().map_err(|_| eof())?,
                ),
            },
            Descriptor::EndHeader => Record::EndHeader,

            Descriptor::ProcessIdExt => Record::ProcessIdExt {
                hwtid: r.read_u32::<LittleEndian>().map_err(|_| eof())?,
                tgid: r.read_u32::<LittleEndian>().map_err(|_| eof())?,
                tid: r.read_u32::<LittleEndian>().map_err(|_| eof())?,
                asid: r.read_u32::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::ForcePc => Record::ForcePc {
                pc: r.read_u64::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::Comment => Record::Comment { text: read_string(r)? },

            Descriptor::InstReg => {
                let operand_type = OperandType::from_byte(r.read_u8().map_err(|_| eof())?)?;
                let reg_id = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let num_values = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let mut values = Vec::with_capacity(num_values as usize);
                for _ in 0..num_values {
                    values.push(r.read_u64::<LittleEndian>().map_err(|_| eof())?);
                }
                Record::InstReg { operand_type, reg_id, values }
            }
            Descriptor::InstReadyReg => Record::InstReadyReg {
                reg_id: r.read_u16::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::InstMemAccess => {
                let vaddr = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let paddr = if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    Some(r.read_u64::<LittleEndian>().map_err(|_| eof())?)
                } else {
                    None
                };
                let size = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let attr = if features.contains(FeatureBitmap::DATA_ATTRIBUTE_PRESENT) {
                    Some(r.read_u8().map_err(|_| eof())?)
                } else {
                    None
                };
                let access_type = MemAccessType::from_byte(r.read_u8().map_err(|_| eof())?)?;
                Record::InstMemAccess { vaddr, paddr, size, attr, access_type }
            }
            Descriptor::InstMemContent => {
                let num = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let mut values = Vec::with_capacity(num as usize);
                for _ in 0..num {
                    values.push(r.read_u64::<LittleEndian>().map_err(|_| eof())?);
                }
                Record::InstMemContent { values }
            }
            Descriptor::InstPcTarget => {
                let target_va = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let target_pa = if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    Some(r.read_u64::<LittleEndian>().map_err(|_| eof())?)
                } else {
                    None
                };
                Record::InstPcTarget { target_va, target_pa }
            }
            Descriptor::InstMicroop => {
                let size = r.read_u8().map_err(|_| eof())?;
                let mut opcode_bytes = vec![0u8; size as usize];
                r.read_exact(&mut opcode_bytes).map_err(|_| eof())?;
                Record::InstMicroop { size, opcode_bytes }
            }
            Descriptor::Event => {
                let event_type = r.read_u32::<LittleEndian>().map_err(|_| eof())?;
                let len = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let mut data = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    data.push(r.read_u64::<LittleEndian>().map_err(|_| eof())?);
                }
                Record::Event { event_type, data }
            }
            Descriptor::EventPcTarget => Record::EventPcTarget {
                target: r.read_u64::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::PageTableWalk => {
                let va = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let pa = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let page_size_log2 = r.read_u32::<LittleEndian>().map_err(|_| eof())?;
                let first_use_index = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let num_entries = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let mut entries = Vec::with_capacity(num_entries as usize);
                for _ in 0..num_entries {
                    entries.push(r.read_u64::<LittleEndian>().map_err(|_| eof())?);
                }
                Record::PageTableWalk { va, pa, page_size_log2, first_use_index, entries }
            }
            Descriptor::BusMasterAccess => {
                let vaddr = r.read_u64::<LittleEndian>().map_err(|_| eof())?;
                let paddr = if features.contains(FeatureBitmap::PHYSICAL_ADDRESS_PRESENT) {
                    Some(r.read_u64::<LittleEndian>().map_err(|_| eof())?)
                } else {
                    None
                };
                let size = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let access_type = MemAccessType::from_byte(r.read_u8().map_err(|_| eof())?)?;
                Record::BusMasterAccess { vaddr, paddr, size, access_type }
            }
            Descriptor::BusMasterContent => {
                let num = r.read_u16::<LittleEndian>().map_err(|_| eof())?;
                let mut values = Vec::with_capacity(num as usize);
                for _ in 0..num {
                    values.push(r.read_u64::<LittleEndian>().map_err(|_| eof())?);
                }
                Record::BusMasterContent { values }
            }
            Descriptor::InstOpcode16 => Record::InstOpcode16 {
                opcode: r.read_u16::<LittleEndian>().map_err(|_| eof())?,
                pc: r.read_u64::<LittleEndian>().map_err(|_| eof())?,
            },
            Descriptor::InstOpcode32 => Record::InstOpcode32 {
                opcode: r.read_u32::<LittleEndian>().map_err(|_| eof())?,
                pc: r.read_u64::<LittleEndian>().map_err(|_| eof())?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: Record, features: FeatureBitmap) {
        let mut buf = Vec::new();
        record.encode(&mut buf, features).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let descriptor = Descriptor::from_byte(cursor.read_u8().unwrap()).unwrap();
        assert_eq!(descriptor, record.descriptor());
        let decoded = Record::decode_body(descriptor, &mut cursor, features).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn roundtrips_every_header_record() {
        roundtrip(Record::Identifier, FeatureBitmap::empty());
        roundtrip(Record::Version { major: 4, minor: 2 }, FeatureBitmap::empty());
        roundtrip(Record::Isa { isa: Isa::RiscV }, FeatureBitmap::empty());
        roundtrip(Record::InstIem { iem: Iem::Rv64 }, FeatureBitmap::empty());
        roundtrip(Record::VlenConfig { vlen: 256 }, FeatureBitmap::empty());
        roundtrip(
            Record::TraceInfo {
                generator_id: 3,
                version: "1.2.3".into(),
                comment: "generated by a test".into(),
            },
            FeatureBitmap::empty(),
        );
        roundtrip(
            Record::TraceInfoFeature { features: FeatureBitmap::PTE_EMBEDDED },
            FeatureBitmap::empty(),
        );
        roundtrip(Record::EndHeader, FeatureBitmap::empty());
    }

    #[test]
    fn roundtrips_mem_access_with_physical_address() {
        let features = FeatureBitmap::PHYSICAL_ADDRESS_PRESENT | FeatureBitmap::DATA_ATTRIBUTE_PRESENT;
        roundtrip(
            Record::InstMemAccess {
                vaddr: 0x1000,
                paddr: Some(0x8000_1000),
                size: 8,
                attr: Some(7),
                access_type: MemAccessType::Write,
            },
            features,
        );
    }

    #[test]
    fn roundtrips_mem_access_without_optional_fields() {
        roundtrip(
            Record::InstMemAccess {
                vaddr: 0x30,
                paddr: None,
                size: 8,
                attr: None,
                access_type: MemAccessType::Read,
            },
            FeatureBitmap::empty(),
        );
    }

    #[test]
    fn roundtrips_opcode_records() {
        roundtrip(Record::InstOpcode16 { opcode: 0x4505, pc: 0x1000 }, FeatureBitmap::empty());
        roundtrip(
            Record::InstOpcode32 { opcode: 0x003100B3, pc: 0x1004 },
            FeatureBitmap::empty(),
        );
    }

    #[test]
    fn roundtrips_page_table_walk() {
        roundtrip(
            Record::PageTableWalk {
                va: 0x4000,
                pa: 0x8000_4000,
                page_size_log2: 12,
                first_use_index: 1,
                entries: vec![0xdead_beef, 0xcafe_babe],
            },
            FeatureBitmap::empty(),
        );
    }

    #[test]
    fn unknown_descriptor_is_corrupt_stream() {
        assert!(Descriptor::from_byte(0xff).is_none());
    }
}
