//! Trap causes, delegation and trap entry/return.

use std::fmt;

use log::{debug, trace};

use super::csr::{self, CSRegisters, CsrSpecifier};
use super::status::Status;
use crate::PrivilegeLevel;

/// Bit set in `xcause` when the trap was caused by an interrupt.
pub const INTERRUPT_BIT: u32 = 0x8000_0000;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Attempt to execute `mret`/`sret` from a lower privilege level.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }

    /// The environment call exception raised by `ecall` at `level`.
    pub fn environment_call_from(level: PrivilegeLevel) -> Self {
        match level {
            PrivilegeLevel::User => Self::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Self::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Self::EnvironmentCallFromMMode,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Interrupt {
    UserSoftwareInterrupt,
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    UserTimerInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    UserExternalInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// All interrupts, highest priority first.
    pub const PRIORITY: [Interrupt; 9] = [
        Self::MachineExternalInterrupt,
        Self::MachineSoftwareInterrupt,
        Self::MachineTimerInterrupt,
        Self::SupervisorExternalInterrupt,
        Self::SupervisorSoftwareInterrupt,
        Self::SupervisorTimerInterrupt,
        Self::UserExternalInterrupt,
        Self::UserSoftwareInterrupt,
        Self::UserTimerInterrupt,
    ];

    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u32 {
        match self {
            Self::UserSoftwareInterrupt => 0,
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::UserTimerInterrupt => 4,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::UserExternalInterrupt => 8,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }

    /// The bit of this interrupt in `mip` and `mie`.
    pub fn mask(&self) -> u32 {
        1 << self.code()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// The value written to `xcause`, including [`INTERRUPT_BIT`] for interrupts.
    pub fn code(&self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => INTERRUPT_BIT | interrupt.code(),
        }
    }

    /// Bit index into the delegation registers, also the vector slot in vectored mode.
    pub fn position(&self) -> u32 {
        self.code() & 0xFFFF
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exception) => write!(f, "{exception:?} ({:#x})", self.code()),
            Self::Interrupt(interrupt) => write!(f, "{interrupt:?} ({:#x})", self.code()),
        }
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// A trap request: what happened, plus the value destined for `xtval`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Trap {
    pub cause: TrapCause,
    pub value: u32,
}

impl Trap {
    pub fn new(cause: impl Into<TrapCause>, value: u32) -> Self {
        Self {
            cause: cause.into(),
            value,
        }
    }
}

/// The CSRs a privilege level handles its traps with.
struct TrapRegisters {
    status: CsrSpecifier,
    ie: CsrSpecifier,
    epc: CsrSpecifier,
    cause: CsrSpecifier,
    tval: CsrSpecifier,
    tvec: CsrSpecifier,
}

impl TrapRegisters {
    fn of(level: PrivilegeLevel) -> Self {
        match level {
            PrivilegeLevel::User => Self {
                status: csr::USTATUS,
                ie: csr::UIE,
                epc: csr::UEPC,
                cause: csr::UCAUSE,
                tval: csr::UTVAL,
                tvec: csr::UTVEC,
            },
            PrivilegeLevel::Supervisor => Self {
                status: csr::SSTATUS,
                ie: csr::SIE,
                epc: csr::SEPC,
                cause: csr::SCAUSE,
                tval: csr::STVAL,
                tvec: csr::STVEC,
            },
            PrivilegeLevel::Machine => Self {
                status: csr::MSTATUS,
                ie: csr::MIE,
                epc: csr::MEPC,
                cause: csr::MCAUSE,
                tval: csr::MTVAL,
                tvec: csr::MTVEC,
            },
        }
    }
}

impl CSRegisters {
    /// Returns the privilege level that handles `cause`, following the delegation registers.
    ///
    /// Causes not delegated in `medeleg`/`mideleg` go to M. Causes delegated there but not in
    /// `sedeleg`/`sideleg` go to S, all others to U. The current privilege level plays no part,
    /// so a delegated trap raised in M is still handled in S.
    pub fn delegation_target(&self, cause: &TrapCause) -> PrivilegeLevel {
        let (mdeleg, sdeleg) = match cause {
            TrapCause::Exception(_) => (csr::MEDELEG, csr::SEDELEG),
            TrapCause::Interrupt(_) => (csr::MIDELEG, csr::SIDELEG),
        };
        let bit = 1 << cause.position();
        if self.read_raw(mdeleg) & bit == 0 {
            PrivilegeLevel::Machine
        } else if self.read_raw(sdeleg) & bit == 0 {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    /// Takes `interrupt` if it is not masked, returning the pc of the trap handler.
    ///
    /// An interrupt is not taken (and no state changes) when it targets a lower privilege level
    /// than the current one. It is also not taken when it targets the current level while the
    /// global enable in that level's status register (`ustatus`, `sstatus` or `mstatus`) is
    /// clear. Finally its bit must be set in the enable register of the target level (`uie`,
    /// `sie` or `mie`).
    pub fn take_interrupt(&mut self, interrupt: Interrupt, epc: u32) -> Option<u32> {
        let trap = Trap::new(interrupt, 0);
        let current = self.privilege_level();
        let target = self.delegation_target(&trap.cause);

        let status = Status::from_bits(self.read_raw(TrapRegisters::of(current).status));
        let enabled = self.read_raw(TrapRegisters::of(target).ie);
        if target < current
            || (target == current && !status.interrupts_enabled(current))
            || enabled & interrupt.mask() == 0
        {
            debug!("{} for {target} masked in {current}", trap.cause);
            return None;
        }

        Some(self.enter_trap(&trap, epc))
    }

    /// Takes `trap` unconditionally, returning the pc of the trap handler.
    ///
    /// `epc` is the address execution resumes at after the handler returns. Exceptions enter
    /// through here directly as they cannot be masked. Interrupts go through
    /// [`Self::take_interrupt`] first.
    pub fn enter_trap(&mut self, trap: &Trap, epc: u32) -> u32 {
        let current = self.privilege_level();
        let target = self.delegation_target(&trap.cause);

        let registers = TrapRegisters::of(target);
        self.set_privilege_level(target);
        self.write_raw(registers.epc, epc);
        self.write_raw(registers.cause, trap.cause.code());
        self.write_raw(registers.tval, trap.value);

        let tvec = self.read_raw(registers.tvec);
        let handler = match tvec & 0b11 {
            0 => tvec,
            _ => (tvec & !0b11).wrapping_add(4 * trap.cause.position()),
        };

        let mut status = Status::from_bits(self.read_raw(csr::MSTATUS));
        if target == PrivilegeLevel::Machine {
            status.set_mpie(status.mie());
            status.set_mie(false);
            status.set_mpp(current);
        } else {
            status.set_spie(status.sie());
            status.set_sie(false);
            status.set_spp(current);
        }
        self.write_raw(csr::MSTATUS, status.bits());

        trace!(
            "{} taken from {current} into {target}, epc {epc:#010x}, handler {handler:#010x}",
            trap.cause
        );
        handler
    }

    /// Returns from a machine-mode trap handler, returning the pc to resume at.
    ///
    /// The caller must have checked the hart is in M.
    pub fn mret(&mut self) -> u32 {
        let mut status = Status::from_bits(self.read_raw(csr::MSTATUS));
        let previous = status.mpp();
        status.set_mie(status.mpie());
        status.set_mpie(true);
        status.set_mpp(PrivilegeLevel::User);
        self.write_raw(csr::MSTATUS, status.bits());
        self.set_privilege_level(previous);
        let pc = self.read_raw(csr::MEPC);
        debug!("mret to {previous} at {pc:#010x}");
        pc
    }

    /// Returns from a supervisor-mode trap handler, returning the pc to resume at.
    ///
    /// The caller must have checked the hart is in S or M.
    pub fn sret(&mut self) -> u32 {
        let mut status = Status::from_bits(self.read_raw(csr::MSTATUS));
        let previous = status.spp();
        status.set_sie(status.spie());
        status.set_spie(true);
        status.set_spp(PrivilegeLevel::User);
        self.write_raw(csr::MSTATUS, status.bits());
        self.set_privilege_level(previous);
        let pc = self.read_raw(csr::SEPC);
        debug!("sret to {previous} at {pc:#010x}");
        pc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PC: u32 = 0x8000_0040;

    fn illegal_instruction() -> Trap {
        Trap::new(Exception::IllegalInstruction, 0xFFFF_FFFF)
    }

    #[test]
    fn test_undelegated_exception() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MTVEC, 0x8000_1000);
        assert_eq!(0x8000_1000, csrs.enter_trap(&illegal_instruction(), PC));
        assert_eq!(PrivilegeLevel::Machine, csrs.privilege_level());
        assert_eq!(PC, csrs.read_raw(csr::MEPC));
        assert_eq!(2, csrs.read_raw(csr::MCAUSE));
        assert_eq!(0xFFFF_FFFF, csrs.read_raw(csr::MTVAL));
        // MPP = M, MPIE = MIE = 0
        assert_eq!(0x1800, csrs.read_raw(csr::MSTATUS));
    }

    #[test]
    fn test_delegated_exception() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MEDELEG, 0x4);
        csrs.write_raw(csr::STVEC, 0x8000_2000);
        assert_eq!(0x8000_2000, csrs.enter_trap(&illegal_instruction(), PC));
        assert_eq!(PrivilegeLevel::Supervisor, csrs.privilege_level());
        assert_eq!(PC, csrs.read_raw(csr::SEPC));
        assert_eq!(2, csrs.read_raw(csr::SCAUSE));
        assert_eq!(0, csrs.read_raw(csr::MEPC));
        // SPP holds the lowest bit of M
        assert_eq!(0x100, csrs.read_raw(csr::MSTATUS));
    }

    #[test]
    fn test_delegated_exception_vectored() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MEDELEG, 0x4);
        csrs.write_raw(csr::STVEC, 0x8000_2001);
        assert_eq!(0x8000_2008, csrs.enter_trap(&illegal_instruction(), PC));
    }

    #[test]
    fn test_delegated_to_user() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MEDELEG, 1 << 8);
        csrs.write_raw(csr::SEDELEG, 1 << 8);
        csrs.write_raw(csr::UTVEC, 0x8000_3000);
        let trap = Trap::new(Exception::EnvironmentCallFromUMode, 0);
        assert_eq!(0x8000_3000, csrs.enter_trap(&trap, PC));
        assert_eq!(PrivilegeLevel::User, csrs.privilege_level());
        assert_eq!(PC, csrs.read_raw(csr::UEPC));
        assert_eq!(8, csrs.read_raw(csr::UCAUSE));
    }

    #[test]
    fn test_interrupt_masked_by_global_enable() {
        let mut csrs = CSRegisters::new();
        let mti = Interrupt::MachineTimerInterrupt;
        csrs.write_raw(csr::MIE, mti.mask());
        csrs.write_raw(csr::MIP, mti.mask());
        csrs.write_raw(csr::MTVEC, 0x8000_1000);
        assert_eq!(None, csrs.take_interrupt(mti, PC));
        assert_eq!(0, csrs.read_raw(csr::MEPC));
        assert_eq!(0, csrs.read_raw(csr::MCAUSE));
        assert_eq!(0, csrs.read_raw(csr::MSTATUS));

        csrs.write_raw(csr::MSTATUS, 0x8);
        assert_eq!(Some(0x8000_1000), csrs.take_interrupt(mti, PC));
        assert_eq!(INTERRUPT_BIT | 7, csrs.read_raw(csr::MCAUSE));
        // MPIE = 1, MIE = 0, MPP = M
        assert_eq!(0x1880, csrs.read_raw(csr::MSTATUS));
    }

    #[test]
    fn test_interrupt_masked_by_enable_register() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MSTATUS, 0x8);
        let msi = Interrupt::MachineSoftwareInterrupt;
        assert_eq!(None, csrs.take_interrupt(msi, PC));
    }

    #[test]
    fn test_interrupt_below_current_level() {
        let mut csrs = CSRegisters::new();
        let sti = Interrupt::SupervisorTimerInterrupt;
        csrs.write_raw(csr::MIDELEG, sti.mask());
        csrs.write_raw(csr::MIE, sti.mask());
        csrs.write_raw(csr::MSTATUS, 0xA);
        assert_eq!(None, csrs.take_interrupt(sti, PC));

        // From U, an interrupt targeting S is taken regardless of SIE
        csrs.set_privilege_level(PrivilegeLevel::User);
        csrs.write_raw(csr::MSTATUS, 0);
        csrs.write_raw(csr::STVEC, 0x8000_2001);
        assert_eq!(Some(0x8000_2014), csrs.take_interrupt(sti, PC));
        assert_eq!(PrivilegeLevel::Supervisor, csrs.privilege_level());
        assert_eq!(INTERRUPT_BIT | 5, csrs.read_raw(csr::SCAUSE));
    }

    #[test]
    fn test_user_interrupt_uses_user_enables() {
        let mut csrs = CSRegisters::new();
        let ssi = Interrupt::SupervisorSoftwareInterrupt;
        csrs.write_raw(csr::MIDELEG, ssi.mask());
        csrs.write_raw(csr::SIDELEG, ssi.mask());
        csrs.write_raw(csr::UTVEC, 0x8000_3000);
        csrs.set_privilege_level(PrivilegeLevel::User);
        assert_eq!(PrivilegeLevel::User, csrs.delegation_target(&ssi.into()));

        // Global enable in ustatus is clear
        csrs.write_raw(csr::UIE, ssi.mask());
        assert_eq!(None, csrs.take_interrupt(ssi, PC));

        // Enabled in ustatus, but not in uie
        csrs.write_raw(csr::USTATUS, 0x1);
        csrs.write_raw(csr::UIE, 0);
        csrs.write_raw(csr::MIE, ssi.mask());
        assert_eq!(None, csrs.take_interrupt(ssi, PC));

        // mstatus and mie play no part for a user-level target
        csrs.write_raw(csr::UIE, ssi.mask());
        csrs.write_raw(csr::MIE, 0);
        csrs.write_raw(csr::MSTATUS, 0);
        assert_eq!(Some(0x8000_3000), csrs.take_interrupt(ssi, PC));
        assert_eq!(PrivilegeLevel::User, csrs.privilege_level());
        assert_eq!(INTERRUPT_BIT | 1, csrs.read_raw(csr::UCAUSE));
        assert_eq!(PC, csrs.read_raw(csr::UEPC));
    }

    #[test]
    fn test_supervisor_interrupt_uses_sie() {
        let mut csrs = CSRegisters::new();
        let sti = Interrupt::SupervisorTimerInterrupt;
        csrs.write_raw(csr::MIDELEG, sti.mask());
        csrs.write_raw(csr::STVEC, 0x8000_2000);
        csrs.set_privilege_level(PrivilegeLevel::Supervisor);
        // sstatus.SIE set, and sie is the supervisor view of mie
        csrs.write_raw(csr::SSTATUS, 0x2);
        assert_eq!(None, csrs.take_interrupt(sti, PC));
        csrs.write_raw(csr::SIE, sti.mask());
        assert_eq!(Some(0x8000_2000), csrs.take_interrupt(sti, PC));
    }

    #[test]
    fn test_mret() {
        let mut csrs = CSRegisters::new();
        csrs.write_raw(csr::MEPC, 0x8000_0100);
        // MPP = S, MPIE = 1
        csrs.write_raw(csr::MSTATUS, 0x0880);
        assert_eq!(0x8000_0100, csrs.mret());
        assert_eq!(PrivilegeLevel::Supervisor, csrs.privilege_level());
        assert_eq!(0x0088, csrs.read_raw(csr::MSTATUS));
    }

    #[test]
    fn test_sret() {
        let mut csrs = CSRegisters::new();
        csrs.set_privilege_level(PrivilegeLevel::Supervisor);
        csrs.write_raw(csr::SEPC, 0x8000_0200);
        // SPP = U, SPIE = 1
        csrs.write_raw(csr::MSTATUS, 0x0020);
        assert_eq!(0x8000_0200, csrs.sret());
        assert_eq!(PrivilegeLevel::User, csrs.privilege_level());
        assert_eq!(0x0022, csrs.read_raw(csr::MSTATUS));
    }

    #[test]
    fn test_trap_then_return() {
        let mut csrs = CSRegisters::new();
        csrs.set_privilege_level(PrivilegeLevel::User);
        csrs.write_raw(csr::MTVEC, 0x8000_1000);
        let trap = Trap::new(Exception::EnvironmentCallFromUMode, 0);
        assert_eq!(0x8000_1000, csrs.enter_trap(&trap, PC));
        assert_eq!(PrivilegeLevel::Machine, csrs.privilege_level());
        assert_eq!(PC, csrs.mret());
        assert_eq!(PrivilegeLevel::User, csrs.privilege_level());
    }
}
