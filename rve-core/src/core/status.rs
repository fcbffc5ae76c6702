use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::PrivilegeLevel;

/// Mask to be applied to mstatus to get sstatus.
pub const SSTATUS_MASK: u32 = 0x000d_e162;

/// Typed view over the bits of the mstatus register.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus appears
/// > as the sstatus register in the S-level ISA.
///
/// Only the fields trap entry and trap return touch have accessors. Every other bit is carried
/// through unchanged.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Status(u32);

impl Status {
    pub fn from_bits(mstatus: u32) -> Self {
        Self(mstatus)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the UIE (U-mode Interrupt Enable) bit is set.
    pub fn uie(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::UIE]
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns the privilege level held in the one-bit SPP field (`U` or `S`).
    pub fn spp(&self) -> PrivilegeLevel {
        match self.0.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Stores the lowest bit of `level` in the SPP field.
    pub fn set_spp(&mut self, level: PrivilegeLevel) {
        let value = (level as u8) & 1 != 0;
        self.0.view_bits_mut::<Lsb0>().set(idx::SPP, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**: the reserved encoding reads back as `U`.
    pub fn mpp(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u2_lossy(self.0.view_bits::<Lsb0>()[idx::MPP].load_le::<u8>())
    }

    pub fn set_mpp(&mut self, level: PrivilegeLevel) {
        self.0.view_bits_mut::<Lsb0>()[idx::MPP].store_le(level as u8);
    }

    /// Returns `true` if the global interrupt-enable bit of `level` is set.
    pub fn interrupts_enabled(&self, level: PrivilegeLevel) -> bool {
        match level {
            PrivilegeLevel::User => self.uie(),
            PrivilegeLevel::Supervisor => self.sie(),
            PrivilegeLevel::Machine => self.mie(),
        }
    }
}

/// Indices of the fields in mstatus.
mod idx {
    use std::ops::Range;

    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: Range<usize> = 11..13;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_bits() {
        let mut status = Status::default();
        status.set_mie(true);
        status.set_sie(true);
        assert_eq!(0b1010, status.bits());
        assert!(status.interrupts_enabled(PrivilegeLevel::Machine));
        assert!(status.interrupts_enabled(PrivilegeLevel::Supervisor));
        assert!(!status.interrupts_enabled(PrivilegeLevel::User));
        assert!(Status::from_bits(1).interrupts_enabled(PrivilegeLevel::User));
    }

    #[test]
    fn test_previous_privilege() {
        let mut status = Status::default();
        status.set_mpp(PrivilegeLevel::Machine);
        assert_eq!(0x1800, status.bits());
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        status.set_mpp(PrivilegeLevel::Supervisor);
        assert_eq!(0x0800, status.bits());
        assert_eq!(PrivilegeLevel::User, Status::from_bits(0x1000).mpp());

        status.set_spp(PrivilegeLevel::Supervisor);
        assert_eq!(PrivilegeLevel::Supervisor, status.spp());
        status.set_spp(PrivilegeLevel::Machine);
        assert_eq!(PrivilegeLevel::Supervisor, status.spp());
        status.set_spp(PrivilegeLevel::User);
        assert_eq!(0x0800, status.bits());
    }

    #[test]
    fn test_sstatus_mask_covers_supervisor_fields() {
        let mut status = Status::default();
        status.set_sie(true);
        status.set_spie(true);
        status.set_spp(PrivilegeLevel::Supervisor);
        assert_eq!(status.bits(), status.bits() & SSTATUS_MASK);
        status.set_mie(true);
        status.set_mpie(true);
        assert_eq!(0x122, status.bits() & SSTATUS_MASK);
    }
}
