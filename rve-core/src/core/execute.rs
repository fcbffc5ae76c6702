use log::debug;

use super::csr::CSRegisters;
use super::trap::{Exception, Trap};
use super::{ExecutionResult, HartError};
use crate::instruction::{FormatB, FormatCsr, FormatI, FormatJ, FormatR, FormatS, FormatU};
use crate::registers::{Registers, Specifier};
use crate::system_bus::{MemoryError, SystemBus};
use crate::{Alignment, PrivilegeLevel};

/// Program-exit environment call number (`a7`).
const ECALL_EXIT: u32 = 93;

/// Executes a single decoded instruction.
///
/// Registers are only read. Every register, pc and CSR update is handed back in the
/// [`ExecutionResult`] and applied by the core when the instruction commits. Memory, the
/// reservation and (for `mret`/`sret`) the privilege state are updated in place.
#[derive(Debug)]
pub(super) struct Executor<'c> {
    pub registers: &'c Registers,
    pub cs_registers: &'c mut CSRegisters,
    pub system_bus: &'c mut SystemBus,
    pub reservation: &'c mut Option<u32>,
    pub raw_instruction: u32,
}

type Execution = Result<ExecutionResult, HartError>;

impl<'c> Executor<'c> {
    /// Executes an `addi` instruction.
    ///
    /// Corresponds to the assembly instruction `addi rd rs1 imm`.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result. ADDI rd, rs1, 0 is used
    /// > to implement the MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, operands: FormatI) -> Execution {
        self.reg_imm_op(operands, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// Corresponds to the assembly instruction `slti rd rs1 imm`.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, operands: FormatI) -> Execution {
        let value = (self.x_signed(operands.rs1) < operands.imm) as u32;
        Ok(ExecutionResult::register(operands.rd, value))
    }

    /// Executes a `sltiu` instruction.
    ///
    /// Corresponds to the assembly instruction `sltiu rd rs1 imm`.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is
    /// > first sign-extended to XLEN bits then treated as an unsigned number).
    pub fn sltiu(&mut self, operands: FormatI) -> Execution {
        self.reg_imm_op(operands, |s, imm| (s < (imm as u32)) as u32)
    }

    /// Executes a `xori` instruction.
    ///
    /// > ANDI, ORI, XORI are logical operations that perform bitwise AND, OR, and XOR on register
    /// > rs1 and the sign-extended 12-bit immediate and place the result in rd.
    pub fn xori(&mut self, operands: FormatI) -> Execution {
        self.reg_imm_op(operands, |s, imm| s ^ (imm as u32))
    }

    /// Executes an `ori` instruction.
    pub fn ori(&mut self, operands: FormatI) -> Execution {
        self.reg_imm_op(operands, |s, imm| s | (imm as u32))
    }

    /// Executes an `andi` instruction.
    pub fn andi(&mut self, operands: FormatI) -> Execution {
        self.reg_imm_op(operands, |s, imm| s & (imm as u32))
    }

    /// Executes a `slli` instruction.
    ///
    /// Corresponds to the assembly instruction `slli rd rs1 shamt`. The shift amount comes from
    /// the instruction word (bits `24:20`), never from a register.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower bits).
    pub fn slli(&mut self, operands: FormatR) -> Execution {
        self.reg_shamt_op(operands, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper bits).
    pub fn srli(&mut self, operands: FormatR) -> Execution {
        self.reg_shamt_op(operands, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated upper
    /// > bits).
    pub fn srai(&mut self, operands: FormatR) -> Execution {
        let value = self.x_signed(operands.rs1) >> operands.shamt();
        Ok(ExecutionResult::register(operands.rd, value as u32))
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type format.
    /// > LUI places the 32-bit U-immediate value into the destination register rd, filling in the
    /// > lowest 12 bits with zeros.
    pub fn lui(&mut self, operands: FormatU) -> Execution {
        Ok(ExecutionResult::register(operands.rd, operands.imm as u32))
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the
    /// > U-type format. AUIPC forms a 32-bit offset from the U-immediate, filling in the lowest 12
    /// > bits with zeros, adds this offset to the address of the AUIPC instruction, then places the
    /// > result in register rd.
    pub fn auipc(&mut self, operands: FormatU) -> Execution {
        let value = self.pc().wrapping_add_signed(operands.imm);
        Ok(ExecutionResult::register(operands.rd, value))
    }

    pub fn add(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `sll` instruction. Only the low 5 bits of `rs2` are used as shift amount.
    pub fn sll(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1 << (s2 & 0x1F))
    }

    pub fn slt(&mut self, operands: FormatR) -> Execution {
        self.signed_reg_reg_op(operands, |s1, s2| (s1 < s2) as i32)
    }

    pub fn sltu(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| (s1 < s2) as u32)
    }

    pub fn xor(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1 ^ s2)
    }

    pub fn srl(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn sra(&mut self, operands: FormatR) -> Execution {
        self.signed_reg_reg_op(operands, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn or(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1 | s2)
    }

    pub fn and(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1 & s2)
    }

    /// Executes a `jal` instruction.
    ///
    /// Corresponds to the assembly instruction `jal rd offset`.
    ///
    /// > The jump and link (JAL) instruction uses the J-type format, where the J-immediate encodes
    /// > a signed offset in multiples of 2 bytes. The offset is sign-extended and added to the
    /// > address of the jump instruction to form the jump target address.
    ///
    /// The target is not checked for alignment here. A misaligned target traps on its fetch.
    pub fn jal(&mut self, operands: FormatJ) -> Execution {
        let target = self.pc().wrapping_add_signed(operands.imm);
        self.jump_op(operands.rd, target)
    }

    /// Executes a `jalr` instruction.
    ///
    /// Corresponds to the assembly instruction `jalr rd rs1 offset`.
    ///
    /// > The target address is obtained by adding the sign-extended 12-bit I-immediate to the
    /// > register rs1, then setting the least-significant bit of the result to zero.
    pub fn jalr(&mut self, operands: FormatI) -> Execution {
        let target = self.x(operands.rs1).wrapping_add_signed(operands.imm) & !1;
        self.jump_op(operands.rd, target)
    }

    pub fn beq(&mut self, operands: FormatB) -> Execution {
        self.cond_branch(operands, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, operands: FormatB) -> Execution {
        self.cond_branch(operands, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, operands: FormatB) -> Execution {
        self.signed_cond_branch(operands, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, operands: FormatB) -> Execution {
        self.signed_cond_branch(operands, |s1, s2| s1 >= s2)
    }

    pub fn bltu(&mut self, operands: FormatB) -> Execution {
        self.cond_branch(operands, |s1, s2| s1 < s2)
    }

    pub fn bgeu(&mut self, operands: FormatB) -> Execution {
        self.cond_branch(operands, |s1, s2| s1 >= s2)
    }

    /// Executes a `lb` instruction, sign-extending the loaded byte.
    pub fn lb(&mut self, operands: FormatI) -> Execution {
        self.load_op(operands, |bus, address| {
            Ok(bus.read_byte(address)? as i8 as u32)
        })
    }

    /// Executes a `lh` instruction, sign-extending the loaded halfword.
    pub fn lh(&mut self, operands: FormatI) -> Execution {
        self.load_op(operands, |bus, address| {
            Ok(bus.read_halfword(address)? as i16 as u32)
        })
    }

    pub fn lw(&mut self, operands: FormatI) -> Execution {
        self.load_op(operands, |bus, address| bus.read_word(address))
    }

    pub fn lbu(&mut self, operands: FormatI) -> Execution {
        self.load_op(operands, |bus, address| Ok(bus.read_byte(address)? as u32))
    }

    pub fn lhu(&mut self, operands: FormatI) -> Execution {
        self.load_op(operands, |bus, address| Ok(bus.read_halfword(address)? as u32))
    }

    pub fn sb(&mut self, operands: FormatS) -> Execution {
        self.store_op(operands, |bus, address, value| {
            bus.write_byte(address, value as u8)
        })
    }

    pub fn sh(&mut self, operands: FormatS) -> Execution {
        self.store_op(operands, |bus, address, value| {
            bus.write_halfword(address, value as u16)
        })
    }

    pub fn sw(&mut self, operands: FormatS) -> Execution {
        self.store_op(operands, |bus, address, value| bus.write_word(address, value))
    }

    /// Executes a `fence` or `fence.i` instruction.
    ///
    /// With a single hart and no caches, this is equivalent to a nop instruction.
    pub fn fence(&mut self) -> Execution {
        Ok(ExecutionResult::default())
    }

    /// Executes an `ecall` instruction.
    ///
    /// A call with `a7 == 93` ends the program, with exit code `a0 >> 1`. Any other call raises
    /// the environment call exception of the current privilege level.
    pub fn ecall(&mut self) -> Execution {
        if self.x(Specifier::A7) == ECALL_EXIT {
            return Ok(ExecutionResult {
                exit: Some(self.x(Specifier::A0) >> 1),
                ..Default::default()
            });
        }
        let exception = Exception::environment_call_from(self.cs_registers.privilege_level());
        Ok(ExecutionResult::raise(Trap::new(exception, 0)))
    }

    /// Executes an `ebreak` instruction, which has no debugger to return control to and is
    /// therefore a nop.
    pub fn ebreak(&mut self) -> Execution {
        Ok(ExecutionResult::default())
    }

    /// Executes a `csrrw` instruction.
    ///
    /// > The CSRRW (Atomic Read/Write CSR) instruction atomically swaps values in the CSRs and
    /// > integer registers. CSRRW reads the old value of the CSR, zero-extends the value to XLEN
    /// > bits, then writes it to integer register rd. The initial value in rs1 is written to the
    /// > CSR.
    pub fn csrrw(&mut self, operands: FormatCsr) -> Execution {
        let value = self.x(operands.rs1);
        self.csr_op(operands, value, true, |_, value| value)
    }

    /// Executes a `csrrs` instruction. The CSR is not written when `rs1` is `x0`.
    pub fn csrrs(&mut self, operands: FormatCsr) -> Execution {
        let mask = self.x(operands.rs1);
        let write = operands.rs1 != Specifier::X0;
        self.csr_op(operands, mask, write, |old, mask| old | mask)
    }

    /// Executes a `csrrc` instruction. The CSR is not written when `rs1` is `x0`.
    pub fn csrrc(&mut self, operands: FormatCsr) -> Execution {
        let mask = self.x(operands.rs1);
        let write = operands.rs1 != Specifier::X0;
        self.csr_op(operands, mask, write, |old, mask| old & !mask)
    }

    pub fn csrrwi(&mut self, operands: FormatCsr) -> Execution {
        self.csr_op(operands, operands.uimm(), true, |_, value| value)
    }

    /// Executes a `csrrsi` instruction. The CSR is not written when the immediate is zero.
    pub fn csrrsi(&mut self, operands: FormatCsr) -> Execution {
        let mask = operands.uimm();
        self.csr_op(operands, mask, mask != 0, |old, mask| old | mask)
    }

    /// Executes a `csrrci` instruction. The CSR is not written when the immediate is zero.
    pub fn csrrci(&mut self, operands: FormatCsr) -> Execution {
        let mask = operands.uimm();
        self.csr_op(operands, mask, mask != 0, |old, mask| old & !mask)
    }

    pub fn mul(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1.wrapping_mul(s2))
    }

    /// Executes a `mulh` instruction, the upper half of the signed × signed product.
    pub fn mulh(&mut self, operands: FormatR) -> Execution {
        self.signed_reg_reg_op(operands, |s1, s2| ((s1 as i64 * s2 as i64) >> 32) as i32)
    }

    /// Executes a `mulhsu` instruction, the upper half of the signed × unsigned product.
    pub fn mulhsu(&mut self, operands: FormatR) -> Execution {
        let product = self.x_signed(operands.rs1) as i64 * self.x(operands.rs2) as i64;
        Ok(ExecutionResult::register(operands.rd, (product >> 32) as u32))
    }

    /// Executes a `mulhu` instruction, the upper half of the unsigned × unsigned product.
    pub fn mulhu(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| ((s1 as u64 * s2 as u64) >> 32) as u32)
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by zero
    /// > equals the dividend. Signed division overflow occurs only when the most-negative integer
    /// > is divided by −1. The quotient of a signed division with overflow is equal to the
    /// > dividend, and the remainder is zero.
    pub fn div(&mut self, operands: FormatR) -> Execution {
        self.signed_reg_reg_op(operands, |s1, s2| match s2 {
            0 => -1,
            _ => s1.wrapping_div(s2),
        })
    }

    pub fn divu(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1.checked_div(s2).unwrap_or(u32::MAX))
    }

    pub fn rem(&mut self, operands: FormatR) -> Execution {
        self.signed_reg_reg_op(operands, |s1, s2| match s2 {
            0 => s1,
            _ => s1.wrapping_rem(s2),
        })
    }

    pub fn remu(&mut self, operands: FormatR) -> Execution {
        self.reg_reg_op(operands, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    /// Executes a `lr.w` instruction, registering a reservation on the loaded word.
    ///
    /// There is a single reservation. A new `lr.w` replaces it.
    pub fn lr_w(&mut self, operands: FormatR) -> Execution {
        let address = self.x(operands.rs1);
        if !Alignment::WORD.is_aligned(address) {
            return Ok(ExecutionResult::raise(Trap::new(
                Exception::LoadAddressMisaligned,
                address,
            )));
        }
        let value = self.system_bus.read_word(address)?;
        *self.reservation = Some(address);
        Ok(ExecutionResult::register(operands.rd, value))
    }

    /// Executes a `sc.w` instruction.
    ///
    /// Stores and writes 0 to `rd` if the reservation is on this address, clearing it. Otherwise
    /// nothing is stored, 1 is written to `rd` and the reservation is left as is. Ordinary stores
    /// never clear the reservation.
    pub fn sc_w(&mut self, operands: FormatR) -> Execution {
        let address = self.x(operands.rs1);
        if !Alignment::WORD.is_aligned(address) {
            return Ok(ExecutionResult::raise(Trap::new(
                Exception::StoreOrAmoAddressMisaligned,
                address,
            )));
        }
        if *self.reservation != Some(address) {
            return Ok(ExecutionResult::register(operands.rd, 1));
        }
        let value = self.x(operands.rs2);
        self.system_bus.write_word(address, value)?;
        *self.reservation = None;
        Ok(ExecutionResult::register(operands.rd, 0))
    }

    pub fn amoswap_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |_, src| src)
    }

    pub fn amoadd_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem.wrapping_add(src))
    }

    pub fn amoxor_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem ^ src)
    }

    pub fn amoand_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem & src)
    }

    pub fn amoor_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem | src)
    }

    pub fn amomin_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| (mem as i32).min(src as i32) as u32)
    }

    pub fn amomax_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| (mem as i32).max(src as i32) as u32)
    }

    pub fn amominu_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem.min(src))
    }

    pub fn amomaxu_w(&mut self, operands: FormatR) -> Execution {
        self.amo_op(operands, |mem, src| mem.max(src))
    }

    /// Executes an `mret` instruction, which is only legal in M.
    pub fn mret(&mut self) -> Execution {
        if self.cs_registers.privilege_level() != PrivilegeLevel::Machine {
            return Ok(self.illegal_instruction());
        }
        Ok(ExecutionResult::jump(self.cs_registers.mret()))
    }

    /// Executes an `sret` instruction, which is only legal in S and M.
    pub fn sret(&mut self) -> Execution {
        if self.cs_registers.privilege_level() < PrivilegeLevel::Supervisor {
            return Ok(self.illegal_instruction());
        }
        Ok(ExecutionResult::jump(self.cs_registers.sret()))
    }

    /// Executes `wfi`, `uret` or `sfence.vma`, all of which are accepted as nops.
    pub fn nop(&mut self) -> Execution {
        Ok(ExecutionResult::default())
    }

    /// The result for an instruction that cannot execute, with the instruction word as value.
    pub fn illegal_instruction(&self) -> ExecutionResult {
        ExecutionResult::raise(Trap::new(
            Exception::IllegalInstruction,
            self.raw_instruction,
        ))
    }

    fn pc(&self) -> u32 {
        self.registers.pc()
    }

    fn x(&self, specifier: Specifier) -> u32 {
        self.registers.x(specifier)
    }

    fn x_signed(&self, specifier: Specifier) -> i32 {
        self.registers.x_signed(specifier)
    }

    #[inline]
    fn reg_imm_op<F>(&mut self, operands: FormatI, op: F) -> Execution
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let value = op(self.x(operands.rs1), operands.imm);
        Ok(ExecutionResult::register(operands.rd, value))
    }

    #[inline]
    fn reg_shamt_op<F>(&mut self, operands: FormatR, op: F) -> Execution
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let value = op(self.x(operands.rs1), operands.shamt());
        Ok(ExecutionResult::register(operands.rd, value))
    }

    #[inline]
    fn reg_reg_op<F>(&mut self, operands: FormatR, op: F) -> Execution
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let value = op(self.x(operands.rs1), self.x(operands.rs2));
        Ok(ExecutionResult::register(operands.rd, value))
    }

    #[inline]
    fn signed_reg_reg_op<F>(&mut self, operands: FormatR, op: F) -> Execution
    where
        F: FnOnce(i32, i32) -> i32,
    {
        let value = op(self.x_signed(operands.rs1), self.x_signed(operands.rs2));
        Ok(ExecutionResult::register(operands.rd, value as u32))
    }

    fn jump_op(&mut self, dest: Specifier, target: u32) -> Execution {
        // The link is computed even for x0, the write-back discards it
        let link = self.pc().wrapping_add(4);
        Ok(ExecutionResult {
            write_back: Some((dest, link)),
            next_pc: Some(target),
            ..Default::default()
        })
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(&mut self, operands: FormatB, predicate: P) -> Execution
    where
        P: FnOnce(u32, u32) -> bool,
    {
        match predicate(self.x(operands.rs1), self.x(operands.rs2)) {
            true => Ok(ExecutionResult::jump(
                self.pc().wrapping_add_signed(operands.imm),
            )),
            false => Ok(ExecutionResult::default()),
        }
    }

    fn signed_cond_branch<P>(&mut self, operands: FormatB, predicate: P) -> Execution
    where
        P: FnOnce(i32, i32) -> bool,
    {
        match predicate(self.x_signed(operands.rs1), self.x_signed(operands.rs2)) {
            true => Ok(ExecutionResult::jump(
                self.pc().wrapping_add_signed(operands.imm),
            )),
            false => Ok(ExecutionResult::default()),
        }
    }

    #[inline]
    fn load_op<F>(&mut self, operands: FormatI, op: F) -> Execution
    where
        F: FnOnce(&mut SystemBus, u32) -> Result<u32, MemoryError>,
    {
        let address = self.x(operands.rs1).wrapping_add_signed(operands.imm);
        let value = op(&mut *self.system_bus, address)?;
        Ok(ExecutionResult::register(operands.rd, value))
    }

    #[inline]
    fn store_op<F>(&mut self, operands: FormatS, op: F) -> Execution
    where
        F: FnOnce(&mut SystemBus, u32, u32) -> Result<(), MemoryError>,
    {
        let address = self.x(operands.rs1).wrapping_add_signed(operands.imm);
        let value = self.x(operands.rs2);
        op(&mut *self.system_bus, address, value)?;
        Ok(ExecutionResult::default())
    }

    fn amo_op<F>(&mut self, operands: FormatR, op: F) -> Execution
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let address = self.x(operands.rs1);
        if !Alignment::WORD.is_aligned(address) {
            return Ok(ExecutionResult::raise(Trap::new(
                Exception::StoreOrAmoAddressMisaligned,
                address,
            )));
        }
        let src = self.x(operands.rs2);
        let old = self.system_bus.read_word(address)?;
        self.system_bus.write_word(address, op(old, src))?;
        Ok(ExecutionResult::register(operands.rd, old))
    }

    /// Reads the CSR now, and hands the write (if any) to the commit stage.
    ///
    /// An access without sufficient privilege raises an illegal-instruction trap with the pc as
    /// value. Writes to read-only CSRs are caught when the write commits.
    fn csr_op<F>(&mut self, operands: FormatCsr, operand: u32, write: bool, op: F) -> Execution
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let old = match self.cs_registers.read(operands.csr) {
            Ok(value) => value,
            Err(err) => {
                debug!("{err}");
                return Ok(ExecutionResult::raise(Trap::new(
                    Exception::IllegalInstruction,
                    self.pc(),
                )));
            }
        };
        Ok(ExecutionResult {
            write_back: Some((operands.rd, old)),
            csr_write: write.then(|| (operands.csr, op(old, operand))),
            ..Default::default()
        })
    }
}
