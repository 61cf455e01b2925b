//! Markpoint/tracepoint detection (spec §4.6, SPEC_FULL §2): two specific
//! encodings of `or`/`xor` writing to `x0` with both sources equal, used as
//! tool-visible region markers. Grounded on `stf_decoder.hpp::isMarkpoint`/
//! `isTracepoint`: `OP` opcode, `rd == x0`, `rs1 == rs2`, distinguished by
//! `funct3`/`funct7` (`or` vs `xor`), both zero-`funct7` (base-ISA, not an
//! extension variant).

use stf_types::REG_X0;

use crate::fields::{self, opcode};

const FUNCT3_XOR: u32 = 0b100;
const FUNCT3_OR: u32 = 0b110;

fn is_reg_reg_nop_shape(word: u32, funct3: u32) -> bool {
    fields::major_opcode(word) == opcode::OP
        && fields::rd(word) == REG_X0
        && fields::funct7(word) == 0
        && fields::funct3(word) == funct3
        && fields::rs1(word) == fields::rs2(word)
}

/// `or rd=x0, rs1, rs2` with `rs1 == rs2`.
pub fn is_markpoint(word: u32) -> bool {
    is_reg_reg_nop_shape(word, FUNCT3_OR)
}

/// `xor rd=x0, rs1, rs2` with `rs1 == rs2`.
pub fn is_tracepoint(word: u32) -> bool {
    is_reg_reg_nop_shape(word, FUNCT3_XOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_op(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32) -> u32 {
        (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode::OP
    }

    #[test]
    fn or_x0_x5_x5_is_a_markpoint() {
        let word = encode_op(0, 5, 5, FUNCT3_OR, 0);
        assert!(is_markpoint(word));
        assert!(!is_tracepoint(word));
    }

    #[test]
    fn xor_x0_x5_x5_is_a_tracepoint() {
        let word = encode_op(0, 5, 5, FUNCT3_XOR, 0);
        assert!(is_tracepoint(word));
        assert!(!is_markpoint(word));
    }

    #[test]
    fn or_with_different_sources_is_not_a_markpoint() {
        let word = encode_op(0, 5, 6, FUNCT3_OR, 0);
        assert!(!is_markpoint(word));
    }

    #[test]
    fn or_writing_nonzero_dest_is_not_a_markpoint() {
        let word = encode_op(0, 5, 5, FUNCT3_OR, 3);
        assert!(!is_markpoint(word));
    }
}
