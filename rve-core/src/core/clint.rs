//! Core Local Interruptor

use crate::bus::Bus;
use log::warn;

pub const MSIP_ADDR: u32 = 0x0000;
pub const MTIMECMP_ADDR_LO: u32 = 0x4000;
pub const MTIMECMP_ADDR_HI: u32 = MTIMECMP_ADDR_LO + 4;
pub const MTIME_ADDR_LO: u32 = 0xbff8;
pub const MTIME_ADDR_HI: u32 = MTIME_ADDR_LO + 4;

/// Machine timer and software interrupt sources of the hart.
///
/// `mtime` advances by one every [`Clint::tick`]. The timer interrupt is pending while
/// `mtimecmp` is non-zero and `mtime >= mtimecmp`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Clint {
    msip: u32,
    mtime: u64,
    mtimecmp: u64,
    /// Set whenever `mtimecmp` is written, until taken by [`Clint::take_rearmed`].
    rearmed: bool,
}

impl Clint {
    /// Create new CLINT in reset state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the CLINT, setting everything to its reset state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn tick(&mut self) {
        self.mtime = self.mtime.wrapping_add(1);
    }

    pub fn timer_pending(&self) -> bool {
        self.mtimecmp != 0 && self.mtime >= self.mtimecmp
    }

    pub fn software_pending(&self) -> bool {
        self.msip & 1 != 0
    }

    /// Returns `true` once after every write to `mtimecmp`, which acknowledges the timer
    /// interrupt.
    pub fn take_rearmed(&mut self) -> bool {
        std::mem::take(&mut self.rearmed)
    }

    /// Returns the register word containing `address`, or `None` if nothing is mapped there.
    fn read_u32(&self, address: u32) -> Option<u32> {
        match address {
            MSIP_ADDR => Some(self.msip),
            MTIMECMP_ADDR_LO => Some(self.mtimecmp as u32),
            MTIMECMP_ADDR_HI => Some((self.mtimecmp >> 32) as u32),
            MTIME_ADDR_LO => Some(self.mtime as u32),
            MTIME_ADDR_HI => Some((self.mtime >> 32) as u32),
            _ => None,
        }
    }

    fn write_u32(&mut self, address: u32, value: u32) {
        match address {
            MSIP_ADDR => self.msip = value & 1,
            MTIMECMP_ADDR_LO => {
                self.mtimecmp = (self.mtimecmp & 0xFFFF_FFFF_0000_0000) | value as u64;
                self.rearmed = true;
            }
            MTIMECMP_ADDR_HI => {
                self.mtimecmp = ((value as u64) << 32) | (self.mtimecmp & 0xFFFF_FFFF);
                self.rearmed = true;
            }
            MTIME_ADDR_LO => self.mtime = (self.mtime & 0xFFFF_FFFF_0000_0000) | value as u64,
            MTIME_ADDR_HI => self.mtime = ((value as u64) << 32) | (self.mtime & 0xFFFF_FFFF),
            _ => warn!("clint write to unmapped offset {address:#x}"),
        }
    }
}

impl Bus for Clint {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        self.read_pure(buf, address)
    }

    /// Bytes at unmapped offsets read as zero.
    fn read_pure(&self, buf: &mut [u8], address: u32) {
        for (offset, byte) in (address..).zip(buf.iter_mut()) {
            let word = self.read_u32(offset & !0b11).unwrap_or(0);
            *byte = word.to_le_bytes()[(offset & 0b11) as usize];
        }
    }

    /// Each byte is merged into its register word, so narrow and misaligned writes work.
    fn write(&mut self, address: u32, buf: &[u8]) {
        for (offset, &value) in (address..).zip(buf.iter()) {
            let word_address = offset & !0b11;
            let Some(word) = self.read_u32(word_address) else {
                warn!("clint write to unmapped offset {offset:#x}");
                continue;
            };
            let mut bytes = word.to_le_bytes();
            bytes[(offset & 0b11) as usize] = value;
            self.write_u32(word_address, u32::from_le_bytes(bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_word(clint: &mut Clint, address: u32, value: u32) {
        Bus::write(clint, address, &value.to_le_bytes());
    }

    fn read_word(clint: &mut Clint, address: u32) -> u32 {
        let mut buf = [0; 4];
        Bus::read(clint, &mut buf, address);
        u32::from_le_bytes(buf)
    }

    #[test]
    fn test_timer_compare() {
        let mut clint = Clint::new();
        assert!(!clint.timer_pending());
        write_word(&mut clint, MTIMECMP_ADDR_LO, 3);
        assert!(clint.take_rearmed());
        assert!(!clint.take_rearmed());
        clint.tick();
        clint.tick();
        assert!(!clint.timer_pending());
        clint.tick();
        assert!(clint.timer_pending());
        assert_eq!(3, read_word(&mut clint, MTIME_ADDR_LO));
    }

    #[test]
    fn test_zero_mtimecmp_never_fires() {
        let mut clint = Clint::new();
        for _ in 0..10 {
            clint.tick();
        }
        assert!(!clint.timer_pending());
    }

    #[test]
    fn test_split_halves() {
        let mut clint = Clint::new();
        write_word(&mut clint, MTIME_ADDR_HI, 0x1);
        write_word(&mut clint, MTIME_ADDR_LO, 0xFFFF_FFFF);
        assert_eq!(0xFFFF_FFFF, read_word(&mut clint, MTIME_ADDR_LO));
        assert_eq!(0x1, read_word(&mut clint, MTIME_ADDR_HI));
        clint.tick();
        assert_eq!(0x2, read_word(&mut clint, MTIME_ADDR_HI));
        assert_eq!(0x0, read_word(&mut clint, MTIME_ADDR_LO));
        write_word(&mut clint, MTIMECMP_ADDR_HI, 0xAB);
        assert_eq!(0xAB, read_word(&mut clint, MTIMECMP_ADDR_HI));
        assert_eq!(0x0, read_word(&mut clint, MTIMECMP_ADDR_LO));
    }

    #[test]
    fn test_byte_access_and_msip() {
        let mut clint = Clint::new();
        Bus::write(&mut clint, MTIMECMP_ADDR_LO + 1, &[0x12]);
        assert_eq!(0x1200, read_word(&mut clint, MTIMECMP_ADDR_LO));
        write_word(&mut clint, MSIP_ADDR, 0xFFFF_FFFF);
        assert!(clint.software_pending());
        assert_eq!(1, read_word(&mut clint, MSIP_ADDR));
    }
}
