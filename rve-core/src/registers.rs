//! General purpose registers of a hart.

use std::fmt;

/// The number of `x` registers available (indices start at `0` for `x0`)
pub const LEN: u8 = 32;

/// The integer register file and program counter of a single RV32 hart.
///
/// Every register stores one 32-bit pattern. Instructions that treat a register as signed go
/// through [`Registers::x_signed`], which reinterprets the same bits as two's complement, so
/// wrapping arithmetic behaves identically in both views.
///
/// > For RV32I, the 32 x registers are each 32 bits wide, i.e., XLEN=32. Register x0 is hardwired
/// > with all bits equal to 0.
///
/// It is not possible to get a mutable reference to an `x` register, since that would allow
/// unchecked writes to register `x0`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Registers {
    x_registers: [u32; LEN as usize],
    pc: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// Returns a fresh set of all-zero registers with `pc` set to `initial_pc`.
    pub fn new(initial_pc: u32) -> Self {
        Self {
            x_registers: [0; LEN as usize],
            pc: initial_pc,
        }
    }

    /// Returns the value of an `x` register.
    pub fn x(&self, specifier: Specifier) -> u32 {
        self.x_registers[usize::from(specifier)]
    }

    /// Returns the value of an `x` register, interpreted as a two's complement number.
    pub fn x_signed(&self, specifier: Specifier) -> i32 {
        self.x(specifier) as i32
    }

    /// Sets the value of an `x` register.
    ///
    /// Writes to register `x0` are discarded.
    pub fn set_x(&mut self, specifier: Specifier, value: u32) {
        self.replace_x(specifier, value);
    }

    /// Replaces the value of an `x` register, returning its old value.
    ///
    /// Writes to register `x0` are discarded.
    pub fn replace_x(&mut self, specifier: Specifier, value: u32) -> u32 {
        if specifier == Specifier::X0 {
            0
        } else {
            std::mem::replace(&mut self.x_registers[usize::from(specifier)], value)
        }
    }

    /// Read-only view of all 32 `x` registers, `x0` first.
    pub fn x_registers(&self) -> &[u32; LEN as usize] {
        &self.x_registers
    }

    /// Returns the value of the `pc` register.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Sets the value of the `pc` register.
    pub fn set_pc(&mut self, value: u32) {
        self.pc = value;
    }
}

impl fmt::Display for Registers {
    /// Four registers per line, e.g. `x4: 0x00000000 x5: ...`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in Specifier::iter_all().collect::<Vec<_>>().chunks(4) {
            let line = row
                .iter()
                .map(|&s| format!("{:>3}: {:#010x}", s, self.x(s)))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{line}")?;
        }
        write!(f, " pc: {:#010x}", self.pc)
    }
}

/// An `x` register specifier. Can take values in the range `0..LEN`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Specifier(u8);

impl Specifier {
    /// Register `x0`, a.k.a. register `zero`, always returns `0` on read, and ignores any writes.
    pub const X0: Self = Specifier(0);
    /// `a0`, first argument / return value register.
    pub const A0: Self = Specifier(10);
    /// `a1`, second argument register.
    pub const A1: Self = Specifier(11);
    /// `a7`, holds the environment call number.
    pub const A7: Self = Specifier(17);

    /// Convert a 5-bit value into a register specifier.
    /// Panics if the value doesn't fit in 5 bits (`0..=31`).
    pub fn from_u5(value_u5: u8) -> Self {
        const_assert_eq!(LEN, 32);
        if value_u5 > 31 {
            panic!("out of range u5 used");
        }
        Self(value_u5)
    }

    /// Return an iterator over all register specifier, starting at x0 up to x31.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..LEN).map(Self)
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("x{}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_zero() {
        let mut registers = Registers::default();
        registers.set_x(Specifier::X0, 0xDEADBEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0, registers.replace_x(Specifier::X0, 1));
        assert_eq!(0, registers.x(Specifier::X0));
    }

    #[test]
    fn test_set_x() {
        let mut registers = Registers::new(0x8000_0000);
        for i in 1..LEN {
            registers.set_x(Specifier::from_u5(i), i as u32 * 3);
        }
        for i in 1..LEN {
            assert_eq!(i as u32 * 3, registers.x(Specifier::from_u5(i)));
        }
        assert_eq!(0x8000_0000, registers.pc());
    }

    #[test]
    fn test_signed_view() {
        let mut registers = Registers::default();
        let a0 = Specifier::A0;
        registers.set_x(a0, 0xFFFF_FFFF);
        assert_eq!(-1, registers.x_signed(a0));
        registers.set_x(a0, 0x8000_0000);
        assert_eq!(i32::MIN, registers.x_signed(a0));
        assert_eq!(0x8000_0000, registers.x(a0));
    }

    #[test]
    #[should_panic]
    fn test_from_u5_out_of_range() {
        Specifier::from_u5(32);
    }

    #[test]
    fn test_display() {
        let mut registers = Registers::new(0x8000_0004);
        registers.set_x(Specifier::from_u5(5), 0x1234);
        let text = registers.to_string();
        assert_eq!(9, text.lines().count());
        assert!(text.lines().nth(1).unwrap().contains(" x5: 0x00001234"));
        assert!(text.ends_with(" pc: 0x80000004"));
    }
}
