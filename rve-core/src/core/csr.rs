//! Control and status registers of the hart.
//!
//! All 4096 specifiers are backed by one flat array. The supervisor registers `sstatus`, `sie`
//! and `sip` are never stored on their own: they are masked views over the machine registers.
//! Debug-mode CSRs and the hypervisor extension are not supported.

use log::debug;
use thiserror::Error;

use super::status::SSTATUS_MASK;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

/// Number of addressable CSRs.
pub const COUNT: usize = 1 << 12;

//
// User trap setup and handling (N extension layout, `0x000..=0x044`).
//
/// User status register.
pub const USTATUS: CsrSpecifier = 0x000;
/// User interrupt-enable register.
pub const UIE: CsrSpecifier = 0x004;
/// User trap handler base address.
pub const UTVEC: CsrSpecifier = 0x005;
/// Scratch register for user trap handlers.
pub const USCRATCH: CsrSpecifier = 0x040;
/// User exception program counter.
pub const UEPC: CsrSpecifier = 0x041;
/// User trap cause.
pub const UCAUSE: CsrSpecifier = 0x042;
/// User bad address or instruction.
pub const UTVAL: CsrSpecifier = 0x043;
/// User interrupt pending.
pub const UIP: CsrSpecifier = 0x044;

//
// Unprivileged counters/timers.
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Supervisor trap setup (`0x100..=0x106`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor exception delegation register.
pub const SEDELEG: CsrSpecifier = 0x102;
/// Supervisor interrupt delegation register.
pub const SIDELEG: CsrSpecifier = 0x103;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handlers.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine information registers (`0xF11..=0xF14`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

//
// Machine trap setup (`0x300..=0x306`, `0x310`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;
/// Additional machine status register, RV32 only.
pub const MSTATUSH: CsrSpecifier = 0x310;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

/// Value of `misa` after reset: MXL=1 (32-bit) with the A, I, M, S and U extensions.
pub const MISA_RESET: u32 = 0x4014_1101;

/// Bits of `mie`/`mip` visible through `sie`/`sip`: SSI, STI and SEI.
const SUPERVISOR_INTERRUPTS: u32 = 0x222;

/// Interrupts that can be delegated below machine level: the S and U sources, never M.
const DELEGABLE_INTERRUPTS: u32 = 0x666;

/// Returns `true` if this CSR only supports read access.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is read-only (0b11) or
    // read/write (0b00, 0b01, 0b10)
    (specifier >> 10) & 0b11 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum required privilege level
/// may be a reserved level. This still has a defined meaning: only higher privilege levels are
/// allowed to access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// Reasons a CSR instruction is refused. Both become an illegal-instruction trap.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrError {
    #[error("csr {specifier:#05x} requires privilege {required}, hart is in {actual}")]
    Privileged {
        specifier: CsrSpecifier,
        required: RawPrivilegeLevel,
        actual: PrivilegeLevel,
    },
    #[error("csr {0:#05x} is read-only")]
    ReadOnly(CsrSpecifier),
}

/// The CSR bank together with the current privilege level and the counters that back the
/// hardwired counter CSRs.
#[derive(Debug, Clone)]
pub struct CSRegisters {
    data: Box<[u32]>,
    privilege_level: PrivilegeLevel,
    clock: u64,
    instret: u64,
}

impl Default for CSRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl CSRegisters {
    /// Creates a bank in reset state: every register zero except `misa`, privilege `M`.
    pub fn new() -> Self {
        let mut csrs = Self {
            data: vec![0; COUNT].into_boxed_slice(),
            privilege_level: PrivilegeLevel::Machine,
            clock: 0,
            instret: 0,
        };
        csrs.data[MISA as usize] = MISA_RESET;
        csrs
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.privilege_level
    }

    /// Only trap entry and the trap-return instructions change the privilege level.
    pub(super) fn set_privilege_level(&mut self, level: PrivilegeLevel) {
        self.privilege_level = level;
    }

    /// Number of cycles since reset. Backs `cycle` and `time`.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Number of retired instructions since reset. Backs `instret`.
    pub fn instret(&self) -> u64 {
        self.instret
    }

    pub(super) fn tick_clock(&mut self) {
        self.clock = self.clock.wrapping_add(1);
    }

    pub(super) fn retire(&mut self) {
        self.instret = self.instret.wrapping_add(1);
    }

    /// Returns `true` if the current privilege level may access `specifier`.
    pub fn has_access_privilege(&self, specifier: CsrSpecifier) -> bool {
        required_privilege_level(specifier) <= self.privilege_level
    }

    /// Reads a CSR without any access checks.
    pub fn read_raw(&self, specifier: CsrSpecifier) -> u32 {
        match specifier {
            SSTATUS => self.data[MSTATUS as usize] & SSTATUS_MASK,
            SIE => self.data[MIE as usize] & SUPERVISOR_INTERRUPTS,
            SIP => self.data[MIP as usize] & SUPERVISOR_INTERRUPTS,
            MHARTID => 0,
            CYCLE | TIME => self.clock as u32,
            CYCLEH | TIMEH => (self.clock >> 32) as u32,
            INSTRET => self.instret as u32,
            INSTRETH => (self.instret >> 32) as u32,
            _ => self.data[index(specifier)],
        }
    }

    /// Writes a CSR without any access checks.
    ///
    /// Writes through an alias only change the bits the alias exposes.
    pub fn write_raw(&mut self, specifier: CsrSpecifier, value: u32) {
        match specifier {
            SSTATUS => self.write_masked(MSTATUS, value, SSTATUS_MASK),
            SIE => self.write_masked(MIE, value, SUPERVISOR_INTERRUPTS),
            SIP => self.write_masked(MIP, value, SUPERVISOR_INTERRUPTS),
            MIDELEG => self.data[MIDELEG as usize] = value & DELEGABLE_INTERRUPTS,
            SATP => {
                debug!(satp = value; "satp written, address translation is not supported");
                self.data[SATP as usize] = value;
            }
            _ => self.data[index(specifier)] = value,
        }
    }

    /// Reads a CSR on behalf of the executing program.
    pub fn read(&self, specifier: CsrSpecifier) -> Result<u32, CsrError> {
        self.check_privilege(specifier)?;
        Ok(self.read_raw(specifier))
    }

    /// Writes a CSR on behalf of the executing program.
    pub fn write(&mut self, specifier: CsrSpecifier, value: u32) -> Result<(), CsrError> {
        self.check_privilege(specifier)?;
        if is_read_only(specifier) {
            return Err(CsrError::ReadOnly(specifier));
        }
        self.write_raw(specifier, value);
        Ok(())
    }

    pub(super) fn set_bits(&mut self, specifier: CsrSpecifier, mask: u32) {
        let value = self.read_raw(specifier) | mask;
        self.write_raw(specifier, value);
    }

    pub(super) fn clear_bits(&mut self, specifier: CsrSpecifier, mask: u32) {
        let value = self.read_raw(specifier) & !mask;
        self.write_raw(specifier, value);
    }

    fn write_masked(&mut self, specifier: CsrSpecifier, value: u32, mask: u32) {
        let register = &mut self.data[specifier as usize];
        *register = *register & !mask | value & mask;
    }

    fn check_privilege(&self, specifier: CsrSpecifier) -> Result<(), CsrError> {
        match self.has_access_privilege(specifier) {
            true => Ok(()),
            false => Err(CsrError::Privileged {
                specifier,
                required: required_privilege_level(specifier),
                actual: self.privilege_level,
            }),
        }
    }
}

fn index(specifier: CsrSpecifier) -> usize {
    specifier as usize & (COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let csrs = CSRegisters::new();
        assert_eq!(PrivilegeLevel::Machine, csrs.privilege_level());
        assert_eq!(Ok(MISA_RESET), csrs.read(MISA));
        assert_eq!(Ok(0), csrs.read(MSTATUS));
        assert_eq!(Ok(0), csrs.read(MHARTID));
    }

    #[test]
    fn test_read_write_round_trip() {
        let mut csrs = CSRegisters::new();
        for specifier in [MSCRATCH, MTVEC, MEPC, SSCRATCH, STVEC, UEPC, MEDELEG] {
            csrs.write(specifier, 0xA5A5_0F0F).unwrap();
            assert_eq!(Ok(0xA5A5_0F0F), csrs.read(specifier));
        }
    }

    #[test]
    fn test_supervisor_aliases() {
        let mut csrs = CSRegisters::new();
        csrs.write(MSTATUS, 0x0000_1888).unwrap();
        csrs.write(SSTATUS, 0xFFFF_FFFF).unwrap();
        assert_eq!(Ok(SSTATUS_MASK), csrs.read(SSTATUS));
        assert_eq!(Ok(0x0000_1888 | SSTATUS_MASK), csrs.read(MSTATUS));
        csrs.write(SSTATUS, 0).unwrap();
        assert_eq!(Ok(0x0000_1888), csrs.read(MSTATUS));

        csrs.write(MIE, 0x888).unwrap();
        csrs.write(SIE, 0xFFF).unwrap();
        assert_eq!(Ok(0xAAA), csrs.read(MIE));
        assert_eq!(Ok(0x222), csrs.read(SIE));

        csrs.write(MIP, 0x080).unwrap();
        csrs.write(SIP, 0x002).unwrap();
        assert_eq!(Ok(0x082), csrs.read(MIP));
        assert_eq!(Ok(0x002), csrs.read(SIP));
    }

    #[test]
    fn test_mideleg_mask() {
        let mut csrs = CSRegisters::new();
        csrs.write(MIDELEG, 0xFFFF_FFFF).unwrap();
        assert_eq!(Ok(0x666), csrs.read(MIDELEG));
    }

    #[test]
    fn test_counters() {
        let mut csrs = CSRegisters::new();
        csrs.clock = 0x1_0000_0002;
        csrs.retire();
        assert_eq!(2, csrs.read_raw(CYCLE));
        assert_eq!(2, csrs.read_raw(TIME));
        assert_eq!(1, csrs.read_raw(CYCLEH));
        assert_eq!(1, csrs.read_raw(TIMEH));
        assert_eq!(1, csrs.read_raw(INSTRET));
        assert_eq!(0, csrs.read_raw(INSTRETH));
        csrs.write_raw(MHARTID, 7);
        assert_eq!(0, csrs.read_raw(MHARTID));
    }

    #[test]
    fn test_privilege_check() {
        let mut csrs = CSRegisters::new();
        csrs.set_privilege_level(PrivilegeLevel::User);
        assert_eq!(
            Err(CsrError::Privileged {
                specifier: MSTATUS,
                required: RawPrivilegeLevel::Machine,
                actual: PrivilegeLevel::User,
            }),
            csrs.read(MSTATUS)
        );
        assert!(csrs.read(SSTATUS).is_err());
        assert_eq!(Ok(0), csrs.read(CYCLE));

        csrs.set_privilege_level(PrivilegeLevel::Supervisor);
        assert!(csrs.write(SSCRATCH, 1).is_ok());
        assert!(csrs.write(MSCRATCH, 1).is_err());
        // Hypervisor range requires the reserved level, which only M exceeds
        assert!(csrs.read(0x200).is_err());
    }

    #[test]
    fn test_read_only() {
        let mut csrs = CSRegisters::new();
        assert_eq!(Err(CsrError::ReadOnly(CYCLE)), csrs.write(CYCLE, 1));
        assert_eq!(Err(CsrError::ReadOnly(MHARTID)), csrs.write(MHARTID, 1));
        assert!(is_read_only(MVENDORID));
        assert!(!is_read_only(MSTATUS));
        assert_eq!(RawPrivilegeLevel::Supervisor, required_privilege_level(SATP));
    }
}
