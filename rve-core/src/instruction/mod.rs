//! Decoding of raw 32-bit instruction words.

mod format;

pub use format::{FormatB, FormatCsr, FormatI, FormatJ, FormatR, FormatS, FormatU};

use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// There is one variant per instruction, carrying the operand bundle of its encoding format.
/// Instructions without operands (or whose operands are ignored) carry nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    // RV32I
    Lui(FormatU),
    Auipc(FormatU),
    Jal(FormatJ),
    Jalr(FormatI),
    Beq(FormatB),
    Bne(FormatB),
    Blt(FormatB),
    Bge(FormatB),
    Bltu(FormatB),
    Bgeu(FormatB),
    Lb(FormatI),
    Lh(FormatI),
    Lw(FormatI),
    Lbu(FormatI),
    Lhu(FormatI),
    Sb(FormatS),
    Sh(FormatS),
    Sw(FormatS),
    Addi(FormatI),
    Slti(FormatI),
    Sltiu(FormatI),
    Xori(FormatI),
    Ori(FormatI),
    Andi(FormatI),
    Slli(FormatR),
    Srli(FormatR),
    Srai(FormatR),
    Add(FormatR),
    Sub(FormatR),
    Sll(FormatR),
    Slt(FormatR),
    Sltu(FormatR),
    Xor(FormatR),
    Srl(FormatR),
    Sra(FormatR),
    Or(FormatR),
    And(FormatR),
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    // Zicsr
    Csrrw(FormatCsr),
    Csrrs(FormatCsr),
    Csrrc(FormatCsr),
    Csrrwi(FormatCsr),
    Csrrsi(FormatCsr),
    Csrrci(FormatCsr),
    // RV32M
    Mul(FormatR),
    Mulh(FormatR),
    Mulhsu(FormatR),
    Mulhu(FormatR),
    Div(FormatR),
    Divu(FormatR),
    Rem(FormatR),
    Remu(FormatR),
    // RV32A
    LrW(FormatR),
    ScW(FormatR),
    AmoswapW(FormatR),
    AmoaddW(FormatR),
    AmoxorW(FormatR),
    AmoandW(FormatR),
    AmoorW(FormatR),
    AmominW(FormatR),
    AmomaxW(FormatR),
    AmominuW(FormatR),
    AmomaxuW(FormatR),
    // Privileged
    Uret,
    Sret,
    Mret,
    Wfi,
    SfenceVma(FormatR),
}

impl Instruction {
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        let f3 = funct3(raw_instruction);
        let f7 = funct7(raw_instruction);
        let r = || FormatR::parse(raw_instruction);
        let i = || FormatI::parse(raw_instruction);
        let s = || FormatS::parse(raw_instruction);
        let b = || FormatB::parse(raw_instruction);
        let u = || FormatU::parse(raw_instruction);
        let csr = || FormatCsr::parse(raw_instruction);

        let instruction = match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::Lui => Self::Lui(u()),
            Opcode::Auipc => Self::Auipc(u()),
            Opcode::Jal => Self::Jal(FormatJ::parse(raw_instruction)),
            Opcode::Jalr if f3 == 0 => Self::Jalr(i()),
            Opcode::Branch => match f3 {
                0b000 => Self::Beq(b()),
                0b001 => Self::Bne(b()),
                0b100 => Self::Blt(b()),
                0b101 => Self::Bge(b()),
                0b110 => Self::Bltu(b()),
                0b111 => Self::Bgeu(b()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::Load => match f3 {
                0b000 => Self::Lb(i()),
                0b001 => Self::Lh(i()),
                0b010 => Self::Lw(i()),
                0b100 => Self::Lbu(i()),
                0b101 => Self::Lhu(i()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::Store => match f3 {
                0b000 => Self::Sb(s()),
                0b001 => Self::Sh(s()),
                0b010 => Self::Sw(s()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::OpImm => match (f7, f3) {
                (_, 0b000) => Self::Addi(i()),
                (_, 0b010) => Self::Slti(i()),
                (_, 0b011) => Self::Sltiu(i()),
                (_, 0b100) => Self::Xori(i()),
                (_, 0b110) => Self::Ori(i()),
                (_, 0b111) => Self::Andi(i()),
                // shamt[5] must be zero on RV32, so funct7 is matched in full
                (0b0000000, 0b001) => Self::Slli(r()),
                (0b0000000, 0b101) => Self::Srli(r()),
                (0b0100000, 0b101) => Self::Srai(r()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op => match (f7, f3) {
                (0b0000000, 0b000) => Self::Add(r()),
                (0b0100000, 0b000) => Self::Sub(r()),
                (0b0000000, 0b001) => Self::Sll(r()),
                (0b0000000, 0b010) => Self::Slt(r()),
                (0b0000000, 0b011) => Self::Sltu(r()),
                (0b0000000, 0b100) => Self::Xor(r()),
                (0b0000000, 0b101) => Self::Srl(r()),
                (0b0100000, 0b101) => Self::Sra(r()),
                (0b0000000, 0b110) => Self::Or(r()),
                (0b0000000, 0b111) => Self::And(r()),
                (0b0000001, 0b000) => Self::Mul(r()),
                (0b0000001, 0b001) => Self::Mulh(r()),
                (0b0000001, 0b010) => Self::Mulhsu(r()),
                (0b0000001, 0b011) => Self::Mulhu(r()),
                (0b0000001, 0b100) => Self::Div(r()),
                (0b0000001, 0b101) => Self::Divu(r()),
                (0b0000001, 0b110) => Self::Rem(r()),
                (0b0000001, 0b111) => Self::Remu(r()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::MiscMem => match f3 {
                // Unused fence fields are reserved and must be ignored, so every variant is a
                // plain fence.
                0b000 => Self::Fence,
                0b001 => Self::FenceI,
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::Amo if f3 == 0b010 => {
                // Bits 26:25 hold the aq/rl ordering flags, meaningless for a single hart.
                match raw_instruction >> 27 {
                    0b00010 if u8::from(r().rs2) == 0 => Self::LrW(r()),
                    0b00011 => Self::ScW(r()),
                    0b00001 => Self::AmoswapW(r()),
                    0b00000 => Self::AmoaddW(r()),
                    0b00100 => Self::AmoxorW(r()),
                    0b01100 => Self::AmoandW(r()),
                    0b01000 => Self::AmoorW(r()),
                    0b10000 => Self::AmominW(r()),
                    0b10100 => Self::AmomaxW(r()),
                    0b11000 => Self::AmominuW(r()),
                    0b11100 => Self::AmomaxuW(r()),
                    _ => return Err(DecodeError::IllegalInstruction),
                }
            }
            Opcode::System => match f3 {
                0b000 => match raw_instruction {
                    0x0000_0073 => Self::Ecall,
                    0x0010_0073 => Self::Ebreak,
                    0x0020_0073 => Self::Uret,
                    0x1020_0073 => Self::Sret,
                    0x3020_0073 => Self::Mret,
                    0x1050_0073 => Self::Wfi,
                    _ if f7 == 0b0001001 && u8::from(r().rd) == 0 => Self::SfenceVma(r()),
                    _ => return Err(DecodeError::IllegalInstruction),
                },
                0b001 => Self::Csrrw(csr()),
                0b010 => Self::Csrrs(csr()),
                0b011 => Self::Csrrc(csr()),
                0b101 => Self::Csrrwi(csr()),
                0b110 => Self::Csrrsi(csr()),
                0b111 => Self::Csrrci(csr()),
                _ => return Err(DecodeError::IllegalInstruction),
            },
            Opcode::Jalr | Opcode::Amo => return Err(DecodeError::IllegalInstruction),
        };
        Ok(instruction)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    /// The major opcode (bits `6:0`) is not implemented.
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    /// The opcode is known, but its funct fields select no supported instruction.
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        0b01_000_11 => Some(Opcode::Store),
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    Load,
    MiscMem,
    OpImm,
    Auipc,
    Store,
    Amo,
    Op,
    Lui,
    Branch,
    Jalr,
    Jal,
    System,
}
