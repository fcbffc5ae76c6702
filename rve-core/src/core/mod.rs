//! Provides a simulatable RV32IMA core with machine, supervisor and user privilege levels.

pub mod clint;
pub mod csr;
mod execute;
pub mod status;
pub mod trap;

use log::{debug, trace};
use thiserror::Error;

use crate::instruction::Instruction;
use crate::registers::{Registers, Specifier};
use crate::resources::ram::Ram;
use crate::resources::uart::Uart;
use crate::system_bus::{MemoryError, SystemBus};
use crate::{Alignment, PrivilegeLevel};
use csr::{CSRegisters, CsrSpecifier};
use execute::Executor;
use trap::{Exception, Interrupt, Trap, TrapCause};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// Address to which the core's PC register is reset.
    pub reset_vector: u32,
    /// Capacity of the RAM in bytes.
    pub ram_size: usize,
    /// Value placed in `a1` on reset, e.g. the address of a device tree blob.
    pub boot_a1: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reset_vector: 0x8000_0000,
            ram_size: 128 * 1024 * 1024,
            boot_a1: None,
        }
    }
}

/// RISC-V core implementing the RV32IMA ISA, with the S and U privilege levels.
///
/// As we don't support hardware multithreading, every core always only has a single hart.
/// We therefore don't model RISC-V harts explicitly, but rather consider [`Core`] to be the whole
/// of a core with a single hart.
///
/// > A component is termed a core if it contains an independent instruction fetch unit.
/// > A RISC-V-compatible core might support multiple RISC-V-compatible hardware threads, or harts,
/// > through multithreading.
///
/// The core owns its memory and devices. Every call to [`Core::step`] is one clock cycle, which
/// retires at most one instruction.
#[derive(Debug)]
pub struct Core {
    config: Config,
    registers: Registers,
    cs_registers: CSRegisters,
    system_bus: SystemBus,
    /// Address reserved by the last `lr.w`.
    reservation: Option<u32>,
    exit_code: Option<u32>,
}

/// Conditions the hart cannot continue from. Architectural traps are never reported this way.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum HartError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("ram size {0:#x} is not supported")]
    RamSize(usize),
}

/// What happened during one [`Core::step`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Step {
    /// An instruction retired without trapping.
    Retired,
    /// An exception or interrupt was taken. The pc now points at the trap handler.
    Trapped(TrapCause),
    /// The program asked to exit with the given code. The core will not execute any further.
    Exited(u32),
}

/// The effects of an instruction that still have to be committed.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ExecutionResult {
    pub write_back: Option<(Specifier, u32)>,
    /// Defaults to the next sequential instruction.
    pub next_pc: Option<u32>,
    pub csr_write: Option<(CsrSpecifier, u32)>,
    pub trap: Option<Trap>,
    pub exit: Option<u32>,
}

impl ExecutionResult {
    pub fn register(dest: Specifier, value: u32) -> Self {
        Self {
            write_back: Some((dest, value)),
            ..Default::default()
        }
    }

    pub fn jump(target: u32) -> Self {
        Self {
            next_pc: Some(target),
            ..Default::default()
        }
    }

    pub fn raise(trap: Trap) -> Self {
        Self {
            trap: Some(trap),
            ..Default::default()
        }
    }
}

impl Core {
    /// Creates a core in reset state, with zeroed RAM of `config.ram_size` bytes.
    pub fn new(config: Config) -> Result<Self, HartError> {
        let ram = Ram::new(config.ram_size).ok_or(HartError::RamSize(config.ram_size))?;
        let mut core = Self {
            registers: Registers::new(config.reset_vector),
            cs_registers: CSRegisters::new(),
            system_bus: SystemBus::new(ram),
            reservation: None,
            exit_code: None,
            config,
        };
        core.reset_hart();
        Ok(core)
    }

    /// Puts the hart, its RAM and devices back in reset state.
    pub fn reset(&mut self) {
        self.system_bus.reset();
        self.reset_hart();
    }

    fn reset_hart(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        if let Some(a1) = self.config.boot_a1 {
            self.registers.set_x(Specifier::A1, a1);
        }
        self.cs_registers.reset();
        self.reservation = None;
        self.exit_code = None;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.cs_registers.privilege_level()
    }

    /// Number of cycles stepped since reset.
    pub fn clock(&self) -> u64 {
        self.cs_registers.clock()
    }

    /// Reads a CSR the way the hart sees it, without privilege checks.
    pub fn read_csr_raw(&self, specifier: CsrSpecifier) -> u32 {
        self.cs_registers.read_raw(specifier)
    }

    /// The exit code, once the program has exited.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    pub fn uart_mut(&mut self) -> &mut Uart {
        self.system_bus.uart_mut()
    }

    /// Reads RAM at `offset` (not a bus address) without side effects.
    pub fn read_physical(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.system_bus.read_physical(offset, buf)
    }

    /// Writes RAM at `offset` (not a bus address), e.g. to load a program image.
    pub fn write_physical(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.system_bus.write_physical(offset, data)
    }

    /// Advances the core by one clock cycle.
    ///
    /// The devices tick first. Then the instruction at `pc` is fetched, executed and committed,
    /// after which pending interrupts are considered. Only memory accesses outside RAM and the
    /// device windows end in an `Err`, after which the hart state is undefined.
    pub fn step(&mut self) -> Result<Step, HartError> {
        if let Some(code) = self.exit_code {
            return Ok(Step::Exited(code));
        }
        self.tick_devices();

        let pc = self.registers.pc();
        let result = if !Alignment::WORD.is_aligned(pc) {
            ExecutionResult::raise(Trap::new(Exception::InstructionAddressMisaligned, pc))
        } else {
            let raw_instruction = self.system_bus.read_word(pc)?;
            self.execute_raw_instruction(raw_instruction)?
        };
        Ok(self.commit(pc, result))
    }

    /// Returns a human readable snapshot of the hart state.
    pub fn dump(&self) -> String {
        let pc = self.registers.pc();
        let next = match self.system_bus.read_word_pure(pc) {
            Ok(word) => format!("{word:#010x}"),
            Err(_) => "unmapped".to_owned(),
        };
        format!(
            "DUMP: CPU state @{}\n{}\npriv: {}\nnext instruction: {}",
            self.clock(),
            self.registers,
            self.privilege_level(),
            next,
        )
    }

    fn execute_raw_instruction(
        &mut self,
        raw_instruction: u32,
    ) -> Result<ExecutionResult, HartError> {
        let mut executor = Executor {
            registers: &self.registers,
            cs_registers: &mut self.cs_registers,
            system_bus: &mut self.system_bus,
            reservation: &mut self.reservation,
            raw_instruction,
        };
        match Instruction::decode(raw_instruction) {
            Ok(instruction) => execute_instruction(&mut executor, instruction),
            Err(err) => {
                trace!("cannot decode {raw_instruction:#010x}: {err}");
                Ok(executor.illegal_instruction())
            }
        }
    }

    fn commit(&mut self, pc: u32, mut result: ExecutionResult) -> Step {
        if let Some(code) = result.exit {
            debug!("program exited with code {code}");
            self.exit_code = Some(code);
            return Step::Exited(code);
        }

        if let Some((specifier, value)) = result.csr_write.filter(|_| result.trap.is_none()) {
            if let Err(err) = self.cs_registers.write(specifier, value) {
                debug!("{err}");
                result.trap = Some(Trap::new(Exception::IllegalInstruction, pc));
            }
        }

        if let Some(trap) = result.trap {
            let handler = self.cs_registers.enter_trap(&trap, pc);
            self.registers.set_pc(handler);
            return Step::Trapped(trap.cause);
        }

        if let Some((dest, value)) = result.write_back {
            self.registers.set_x(dest, value);
        }
        self.cs_registers.retire();
        let next_pc = result.next_pc.unwrap_or(pc.wrapping_add(4));
        self.registers.set_pc(next_pc);

        match self.poll_interrupts(next_pc) {
            Some(interrupt) => Step::Trapped(interrupt.into()),
            None => Step::Retired,
        }
    }

    /// Takes the highest priority pending interrupt that is not masked, if any.
    ///
    /// Enables are checked by the trap controller against the level each interrupt targets.
    fn poll_interrupts(&mut self, epc: u32) -> Option<Interrupt> {
        let pending = self.cs_registers.read_raw(csr::MIP);
        if pending == 0 {
            return None;
        }
        for interrupt in Interrupt::PRIORITY {
            if pending & interrupt.mask() == 0 {
                continue;
            }
            if let Some(handler) = self.cs_registers.take_interrupt(interrupt, epc) {
                self.cs_registers.clear_bits(csr::MIP, interrupt.mask());
                self.registers.set_pc(handler);
                return Some(interrupt);
            }
        }
        None
    }

    /// Advances the clock and the devices, and mirrors their interrupt lines into `mip`.
    fn tick_devices(&mut self) {
        self.cs_registers.tick_clock();

        let clint = self.system_bus.clint_mut();
        clint.tick();
        let rearmed = clint.take_rearmed();
        let timer_pending = clint.timer_pending();
        let software_pending = clint.software_pending();

        let mti = Interrupt::MachineTimerInterrupt.mask();
        if rearmed {
            self.cs_registers.clear_bits(csr::MIP, mti);
        }
        if timer_pending {
            self.cs_registers.set_bits(csr::MIP, mti);
        }
        let msi = Interrupt::MachineSoftwareInterrupt.mask();
        match software_pending {
            true => self.cs_registers.set_bits(csr::MIP, msi),
            false => self.cs_registers.clear_bits(csr::MIP, msi),
        }

        let uart = self.system_bus.uart_mut();
        uart.tick();
        let sei = Interrupt::SupervisorExternalInterrupt.mask();
        match uart.is_interrupting() {
            true => self.cs_registers.set_bits(csr::MIP, sei),
            false => self.cs_registers.clear_bits(csr::MIP, sei),
        }
    }
}

fn execute_instruction(
    executor: &mut Executor<'_>,
    instruction: Instruction,
) -> Result<ExecutionResult, HartError> {
    match instruction {
        Instruction::Lui(operands) => executor.lui(operands),
        Instruction::Auipc(operands) => executor.auipc(operands),
        Instruction::Jal(operands) => executor.jal(operands),
        Instruction::Jalr(operands) => executor.jalr(operands),
        Instruction::Beq(operands) => executor.beq(operands),
        Instruction::Bne(operands) => executor.bne(operands),
        Instruction::Blt(operands) => executor.blt(operands),
        Instruction::Bge(operands) => executor.bge(operands),
        Instruction::Bltu(operands) => executor.bltu(operands),
        Instruction::Bgeu(operands) => executor.bgeu(operands),
        Instruction::Lb(operands) => executor.lb(operands),
        Instruction::Lh(operands) => executor.lh(operands),
        Instruction::Lw(operands) => executor.lw(operands),
        Instruction::Lbu(operands) => executor.lbu(operands),
        Instruction::Lhu(operands) => executor.lhu(operands),
        Instruction::Sb(operands) => executor.sb(operands),
        Instruction::Sh(operands) => executor.sh(operands),
        Instruction::Sw(operands) => executor.sw(operands),
        Instruction::Addi(operands) => executor.addi(operands),
        Instruction::Slti(operands) => executor.slti(operands),
        Instruction::Sltiu(operands) => executor.sltiu(operands),
        Instruction::Xori(operands) => executor.xori(operands),
        Instruction::Ori(operands) => executor.ori(operands),
        Instruction::Andi(operands) => executor.andi(operands),
        Instruction::Slli(operands) => executor.slli(operands),
        Instruction::Srli(operands) => executor.srli(operands),
        Instruction::Srai(operands) => executor.srai(operands),
        Instruction::Add(operands) => executor.add(operands),
        Instruction::Sub(operands) => executor.sub(operands),
        Instruction::Sll(operands) => executor.sll(operands),
        Instruction::Slt(operands) => executor.slt(operands),
        Instruction::Sltu(operands) => executor.sltu(operands),
        Instruction::Xor(operands) => executor.xor(operands),
        Instruction::Srl(operands) => executor.srl(operands),
        Instruction::Sra(operands) => executor.sra(operands),
        Instruction::Or(operands) => executor.or(operands),
        Instruction::And(operands) => executor.and(operands),
        Instruction::Fence | Instruction::FenceI => executor.fence(),
        Instruction::Ecall => executor.ecall(),
        Instruction::Ebreak => executor.ebreak(),
        Instruction::Csrrw(operands) => executor.csrrw(operands),
        Instruction::Csrrs(operands) => executor.csrrs(operands),
        Instruction::Csrrc(operands) => executor.csrrc(operands),
        Instruction::Csrrwi(operands) => executor.csrrwi(operands),
        Instruction::Csrrsi(operands) => executor.csrrsi(operands),
        Instruction::Csrrci(operands) => executor.csrrci(operands),
        Instruction::Mul(operands) => executor.mul(operands),
        Instruction::Mulh(operands) => executor.mulh(operands),
        Instruction::Mulhsu(operands) => executor.mulhsu(operands),
        Instruction::Mulhu(operands) => executor.mulhu(operands),
        Instruction::Div(operands) => executor.div(operands),
        Instruction::Divu(operands) => executor.divu(operands),
        Instruction::Rem(operands) => executor.rem(operands),
        Instruction::Remu(operands) => executor.remu(operands),
        Instruction::LrW(operands) => executor.lr_w(operands),
        Instruction::ScW(operands) => executor.sc_w(operands),
        Instruction::AmoswapW(operands) => executor.amoswap_w(operands),
        Instruction::AmoaddW(operands) => executor.amoadd_w(operands),
        Instruction::AmoxorW(operands) => executor.amoxor_w(operands),
        Instruction::AmoandW(operands) => executor.amoand_w(operands),
        Instruction::AmoorW(operands) => executor.amoor_w(operands),
        Instruction::AmominW(operands) => executor.amomin_w(operands),
        Instruction::AmomaxW(operands) => executor.amomax_w(operands),
        Instruction::AmominuW(operands) => executor.amominu_w(operands),
        Instruction::AmomaxuW(operands) => executor.amomaxu_w(operands),
        Instruction::Sret => executor.sret(),
        Instruction::Mret => executor.mret(),
        Instruction::Uret | Instruction::Wfi | Instruction::SfenceVma(_) => executor.nop(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with(program: &[u32]) -> Core {
        let config = Config {
            ram_size: 0x1_0000,
            ..Default::default()
        };
        let mut core = Core::new(config).unwrap();
        let image: Vec<u8> = program.iter().flat_map(|word| word.to_le_bytes()).collect();
        core.write_physical(0, &image).unwrap();
        core
    }

    #[test]
    fn test_reset_state() {
        let config = Config {
            ram_size: 0x1000,
            boot_a1: Some(0x8100_0000),
            ..Default::default()
        };
        let core = Core::new(config).unwrap();
        assert_eq!(0x8000_0000, core.registers().pc());
        assert_eq!(0x8100_0000, core.registers().x(Specifier::A1));
        assert_eq!(PrivilegeLevel::Machine, core.privilege_level());
        assert_eq!(csr::MISA_RESET, core.read_csr_raw(csr::MISA));
        assert_eq!(0, core.clock());
    }

    #[test]
    fn test_invalid_ram_size() {
        let config = Config {
            ram_size: 0,
            ..Default::default()
        };
        assert_eq!(Some(HartError::RamSize(0)), Core::new(config).err());
    }

    #[test]
    fn test_illegal_instruction_traps() {
        let mut core = core_with(&[0xFFFF_FFFF]);
        assert_eq!(
            Ok(Step::Trapped(Exception::IllegalInstruction.into())),
            core.step()
        );
        assert_eq!(0, core.registers().pc());
        assert_eq!(0x8000_0000, core.read_csr_raw(csr::MEPC));
        assert_eq!(0xFFFF_FFFF, core.read_csr_raw(csr::MTVAL));
        assert_eq!(0, core.cs_registers.instret());
    }

    #[test]
    fn test_read_only_csr_write_traps() {
        // csrw cycle, x1
        let mut core = core_with(&[0xC000_9073]);
        assert_eq!(
            Ok(Step::Trapped(Exception::IllegalInstruction.into())),
            core.step()
        );
        assert_eq!(0x8000_0000, core.read_csr_raw(csr::MTVAL));
    }

    #[test]
    fn test_exit_is_sticky() {
        // li a7, 93; li a0, 10; ecall
        let mut core = core_with(&[0x05D0_0893, 0x00A0_0513, 0x0000_0073]);
        assert_eq!(Ok(Step::Retired), core.step());
        assert_eq!(Ok(Step::Retired), core.step());
        assert_eq!(Ok(Step::Exited(5)), core.step());
        assert_eq!(Ok(Step::Exited(5)), core.step());
        assert_eq!(3, core.clock());
        assert_eq!(Some(5), core.exit_code());
    }

    #[test]
    fn test_fetch_outside_memory_is_fatal() {
        let config = Config {
            ram_size: 0x1000,
            reset_vector: 0x0000_1000,
            ..Default::default()
        };
        let mut core = Core::new(config).unwrap();
        assert_eq!(
            Err(HartError::Memory(MemoryError::NotPhysical {
                address: 0x0000_1000
            })),
            core.step()
        );
    }

    #[test]
    fn test_dump() {
        let core = core_with(&[0x0050_0093]);
        let dump = core.dump();
        assert!(dump.starts_with("DUMP: CPU state @0\n"));
        assert!(dump.contains(" pc: 0x80000000"));
        assert!(dump.contains("priv: M"));
        assert!(dump.ends_with("next instruction: 0x00500093"));
    }
}
