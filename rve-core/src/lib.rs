#[macro_use]
extern crate static_assertions;

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod bus;
pub mod core;
pub mod instruction;
pub mod registers;
pub mod resources;
pub mod system_bus;

pub use crate::core::{Config, Core, HartError, Step};

/// List of all possible privilege levels for RISC-V.
///
/// Same as [`PrivilegeLevel`] except that it allows specifying the reserved privilege level `2`.
/// The minimum privilege level a CSR requires is encoded as a 2-bit value, and that value may well
/// be the reserved level (e.g. the hypervisor CSRs in `0x200..=0x2FF`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA. When using the hypervisor extension,
    /// this becomes the Hypervisor privilege level.
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Convert a 2-bit value into a [`RawPrivilegeLevel`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Reserved => "2",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// Privilege level a hart executes in.
///
/// Only `0`, `1`, and `3` are defined; level `2` is *reserved*. The level only ever changes
/// through trap entry (which may raise it) and `mret`/`sret` (the only way it is lowered).
///
/// > The machine level has the highest privileges and is the only mandatory privilege level for a
/// > RISC-V hardware platform. User-mode (U-mode) and supervisor-mode (S-mode) are intended for
/// > conventional application and operating system usage respectively.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`).
    User = 0,
    /// Supervisor (abbreviated `S`).
    Supervisor = 1,
    // Level 2 is reserved
    /// Machine (abbreviated `M`), the level every hart resets into.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Decodes a 2-bit privilege field (e.g. `mstatus.MPP`).
    ///
    /// The reserved encoding `2` maps to `User`, the same WARL treatment a write of an unsupported
    /// level gets.
    pub fn from_u2_lossy(value_u2: u8) -> Self {
        PrivilegeLevel::try_from(RawPrivilegeLevel::from_u2(value_u2 & 0b11)).unwrap_or(Self::User)
    }
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

/// Address alignment, always a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_ordering() {
        assert!(PrivilegeLevel::User < PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor < PrivilegeLevel::Machine);
        assert!(RawPrivilegeLevel::Reserved > PrivilegeLevel::Supervisor);
        assert!(RawPrivilegeLevel::Reserved < PrivilegeLevel::Machine);
        assert!(RawPrivilegeLevel::Supervisor == PrivilegeLevel::Supervisor);
    }

    #[test]
    fn test_from_u2_lossy() {
        assert_eq!(PrivilegeLevel::User, PrivilegeLevel::from_u2_lossy(0));
        assert_eq!(PrivilegeLevel::Supervisor, PrivilegeLevel::from_u2_lossy(1));
        assert_eq!(PrivilegeLevel::User, PrivilegeLevel::from_u2_lossy(2));
        assert_eq!(PrivilegeLevel::Machine, PrivilegeLevel::from_u2_lossy(3));
    }

    #[test]
    fn test_alignment() {
        assert!(Alignment::WORD.is_aligned(0x8000_0000));
        assert!(!Alignment::WORD.is_aligned(0x8000_0002));
        assert!(!Alignment::WORD.is_aligned(0x8000_0001));
    }
}
