//! Operand bundles for the base instruction formats.
//!
//! Parsing only extracts bit fields. Whether the opcode and funct bits form a supported
//! instruction is decided by [`Instruction::decode`](super::Instruction::decode).

use crate::core::csr::CsrSpecifier;
use crate::registers::Specifier;

/// Register-register operands (`rd`, `rs1`, `rs2`).
///
/// Also used by `slli`/`srli`/`srai`, whose shift amount lives in the `rs2` field (bits `24:20`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatR {
    pub rd: Specifier,
    pub rs1: Specifier,
    pub rs2: Specifier,
}

impl FormatR {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rd: rd(raw_instruction),
            rs1: rs1(raw_instruction),
            rs2: rs2(raw_instruction),
        }
    }

    /// The 5-bit shift amount of an immediate shift.
    pub fn shamt(&self) -> u32 {
        u32::from(self.rs2)
    }
}

/// Register-immediate operands with a sign-extended 12-bit immediate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatI {
    pub rd: Specifier,
    pub rs1: Specifier,
    pub imm: i32,
}

impl FormatI {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rd: rd(raw_instruction),
            rs1: rs1(raw_instruction),
            imm: i_imm(raw_instruction),
        }
    }
}

/// Store operands: base `rs1`, source `rs2`, and a split sign-extended 12-bit offset.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatS {
    pub rs1: Specifier,
    pub rs2: Specifier,
    pub imm: i32,
}

impl FormatS {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rs1: rs1(raw_instruction),
            rs2: rs2(raw_instruction),
            imm: s_imm(raw_instruction),
        }
    }
}

/// Branch operands with a 13-bit sign-extended offset (bit 0 always zero).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatB {
    pub rs1: Specifier,
    pub rs2: Specifier,
    pub imm: i32,
}

impl FormatB {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rs1: rs1(raw_instruction),
            rs2: rs2(raw_instruction),
            imm: b_imm(raw_instruction),
        }
    }
}

/// Upper-immediate operands. `imm` holds bits `31:12` in place, the low 12 bits are zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatU {
    pub rd: Specifier,
    pub imm: i32,
}

impl FormatU {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rd: rd(raw_instruction),
            imm: u_imm(raw_instruction),
        }
    }
}

/// Jump operands with a 21-bit sign-extended offset (bit 0 always zero).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatJ {
    pub rd: Specifier,
    pub imm: i32,
}

impl FormatJ {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rd: rd(raw_instruction),
            imm: j_imm(raw_instruction),
        }
    }
}

/// Zicsr operands. For the immediate variants the `rs1` field holds a 5-bit zero-extended
/// immediate instead of a register, see [`FormatCsr::uimm`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FormatCsr {
    pub rd: Specifier,
    pub rs1: Specifier,
    pub csr: CsrSpecifier,
}

impl FormatCsr {
    pub fn parse(raw_instruction: u32) -> Self {
        Self {
            rd: rd(raw_instruction),
            rs1: rs1(raw_instruction),
            csr: (raw_instruction >> 20) as CsrSpecifier,
        }
    }

    pub fn uimm(&self) -> u32 {
        u32::from(self.rs1)
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    (imm_11_5 | (imm_4_0 << 13)) as i32 >> 20
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the U-immediate, i.e. bits `31:12` with the low 12 bits cleared.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        // Other bits are ignored
        assert_eq!(-1, i_imm(0xFFF1_2345));
        assert_eq!(1209, i_imm((1209 << 20) | 0x000C_D10A));
    }

    #[test]
    fn test_s_imm() {
        // sw x2, 8(x1)
        assert_eq!(8, s_imm(0x0020_A423));
        // sw x2, -4(x1)
        assert_eq!(-4, s_imm(0xFE20_AE23));
        assert_eq!(-2048, s_imm(0x8000_0000));
        assert_eq!(2047, s_imm(0x7E00_0F80));
    }

    #[test]
    fn test_b_imm() {
        // beq x0, x0, +8
        assert_eq!(8, b_imm(0x0000_0463));
        // bne x1, x2, -8
        assert_eq!(-8, b_imm(0xFE20_9CE3));
        assert_eq!(-4096, b_imm(0x8000_0000));
        // Bit 0 is never set
        assert_eq!(0, b_imm(0x0000_0000) & 1);
        assert_eq!(0x800, b_imm(0x0000_0080));
    }

    #[test]
    fn test_j_imm() {
        // jal x0, +16
        assert_eq!(16, j_imm(0x0100_006F));
        // jal x1, -4
        assert_eq!(-4, j_imm(0xFFDF_F0EF));
        assert_eq!(-(1 << 20), j_imm(0x8000_0000));
        assert_eq!(0x800, j_imm(0x0010_0000));
    }

    #[test]
    fn test_u_imm() {
        assert_eq!(0x1234_5000, u_imm(0x1234_50B7));
        assert_eq!(0xFFFF_F000_u32 as i32, u_imm(0xFFFF_FFFF));
    }

    #[test]
    fn test_csr_fields() {
        // csrrw x5, mstatus, x6
        let format = FormatCsr::parse(0x3003_12F3);
        assert_eq!(0x300, format.csr);
        assert_eq!(Specifier::from_u5(5), format.rd);
        assert_eq!(Specifier::from_u5(6), format.rs1);
        assert_eq!(6, format.uimm());
    }

    #[test]
    fn test_shamt_from_rs2_field() {
        // srai x1, x2, 31
        let format = FormatR::parse(0x41F1_5093);
        assert_eq!(31, format.shamt());
    }
}
