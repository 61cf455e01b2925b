use crate::Error;

/// Instruction set recorded in the trace header. Only RISC-V is recognized;
/// the byte is still round-tripped so unknown ISAs can be carried through by
/// tools that don't need to interpret instruction semantics (spec Non-goals:
/// no compatibility with non-RISC-V ISAs, but the field itself is preserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Isa {
    /// RISC-V (the only ISA this toolkit interprets).
    RiscV,
    /// Any other value; preserved verbatim, never interpreted.
    Reserved(u8),
}

impl Isa {
    pub fn to_byte(self) -> u8 {
        match self {
            Isa::RiscV => 1,
            Isa::Reserved(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Isa::RiscV,
            other => Isa::Reserved(other),
        }
    }
}

/// Instruction Encoding Mode: RV32 vs RV64. Governs register width and
/// whether `rv64`-only opcodes are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Iem {
    Rv32,
    Rv64,
}

impl Iem {
    pub fn to_byte(self) -> u8 {
        match self {
            Iem::Rv32 => 1,
            Iem::Rv64 => 2,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            1 => Ok(Iem::Rv32),
            2 => Ok(Iem::Rv64),
            other => Err(Error::UnknownDiscriminant(other)),
        }
    }
}
