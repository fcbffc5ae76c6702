//! Physical address decoding between RAM and the memory-mapped devices.

use crate::bus::Bus;
use crate::core::clint::Clint;
use crate::resources::ram::Ram;
use crate::resources::uart::Uart;
use std::ops::Range;
use thiserror::Error;

/// Window of the UART registers.
pub const UART_RANGE: Range<u32> = 0x1000_0000..0x1000_0100;
/// Window of the CLINT registers.
pub const CLINT_RANGE: Range<u32> = 0x0200_0000..0x0201_0000;
/// Bit marking an address as a physical RAM address. It is not part of the RAM offset.
pub const RAM_TAG: u32 = 0x8000_0000;

/// The hart's view of physical memory.
///
/// Device windows are decoded first. Every other address must carry [`RAM_TAG`], and is then
/// masked to 31 bits to index into RAM. All multi-byte accesses are little-endian and composed
/// byte by byte, so they need not be aligned.
#[derive(Debug)]
pub struct SystemBus {
    ram: Ram,
    uart: Uart,
    clint: Clint,
}

/// An access the memory model has no meaning for. The hart cannot continue after one of these.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("address {address:#010x} is neither RAM nor a device register")]
    NotPhysical { address: u32 },
    #[error("address {address:#010x} is beyond the {capacity:#x} bytes of RAM")]
    OutOfRange { address: u32, capacity: usize },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Target {
    Ram(u32),
    Uart(u32),
    Clint(u32),
}

impl SystemBus {
    pub fn new(ram: Ram) -> Self {
        Self {
            ram,
            uart: Uart::new(),
            clint: Clint::new(),
        }
    }

    /// Restores RAM and every device to its reset state.
    pub fn reset(&mut self) {
        self.ram.reset();
        self.uart.reset();
        self.clint.reset();
    }

    pub fn uart_mut(&mut self) -> &mut Uart {
        &mut self.uart
    }

    pub fn clint_mut(&mut self) -> &mut Clint {
        &mut self.clint
    }

    fn decode(&self, address: u32) -> Result<Target, MemoryError> {
        if UART_RANGE.contains(&address) {
            Ok(Target::Uart(address - UART_RANGE.start))
        } else if CLINT_RANGE.contains(&address) {
            Ok(Target::Clint(address - CLINT_RANGE.start))
        } else if address & RAM_TAG == 0 {
            Err(MemoryError::NotPhysical { address })
        } else {
            let offset = address & !RAM_TAG;
            match self.ram.contains(offset, 1) {
                true => Ok(Target::Ram(offset)),
                false => Err(MemoryError::OutOfRange {
                    address,
                    capacity: self.ram.len(),
                }),
            }
        }
    }

    pub fn read_byte(&mut self, address: u32) -> Result<u8, MemoryError> {
        let mut buf = [0];
        match self.decode(address)? {
            Target::Ram(offset) => self.ram.read(&mut buf, offset),
            Target::Uart(offset) => Bus::read(&mut self.uart, &mut buf, offset),
            Target::Clint(offset) => Bus::read(&mut self.clint, &mut buf, offset),
        }
        Ok(buf[0])
    }

    /// Same as [`Self::read_byte`], but register reads with side effects are only peeked at.
    pub fn read_byte_pure(&self, address: u32) -> Result<u8, MemoryError> {
        let mut buf = [0];
        match self.decode(address)? {
            Target::Ram(offset) => self.ram.read(&mut buf, offset),
            Target::Uart(offset) => Bus::read_pure(&self.uart, &mut buf, offset),
            Target::Clint(offset) => Bus::read_pure(&self.clint, &mut buf, offset),
        }
        Ok(buf[0])
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        let buf = [value];
        match self.decode(address)? {
            Target::Ram(offset) => self.ram.write(offset, &buf),
            Target::Uart(offset) => Bus::write(&mut self.uart, offset, &buf),
            Target::Clint(offset) => Bus::write(&mut self.clint, offset, &buf),
        }
        Ok(())
    }

    pub fn read_halfword(&mut self, address: u32) -> Result<u16, MemoryError> {
        let mut bytes = [0; 2];
        self.read_bytes(&mut bytes, address)?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_word(&mut self, address: u32) -> Result<u32, MemoryError> {
        let mut bytes = [0; 4];
        self.read_bytes(&mut bytes, address)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_word_pure(&self, address: u32) -> Result<u32, MemoryError> {
        let mut bytes = [0; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_byte_pure(address.wrapping_add(i as u32))?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_halfword(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Copies `data` into RAM at `offset`, without going through device decoding.
    ///
    /// Meant for placing a program image before execution starts.
    pub fn write_physical(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.check_ram_extent(offset, data.len())?;
        self.ram.write(offset, data);
        Ok(())
    }

    /// Copies RAM starting at `offset` into `buf`, without going through device decoding.
    pub fn read_physical(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check_ram_extent(offset, buf.len())?;
        self.ram.read(buf, offset);
        Ok(())
    }

    fn check_ram_extent(&self, offset: u32, size: usize) -> Result<(), MemoryError> {
        match self.ram.contains(offset, size) {
            true => Ok(()),
            false => Err(MemoryError::OutOfRange {
                address: offset | RAM_TAG,
                capacity: self.ram.len(),
            }),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8], address: u32) -> Result<(), MemoryError> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(address.wrapping_add(i as u32))?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u32, buf: &[u8]) -> Result<(), MemoryError> {
        for (i, &byte) in buf.iter().enumerate() {
            self.write_byte(address.wrapping_add(i as u32), byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SystemBus {
        SystemBus::new(Ram::new(0x1000).unwrap())
    }

    #[test]
    fn test_word_round_trip() {
        let mut bus = bus();
        bus.write_word(0x8000_0010, 0xDEAD_BEEF).unwrap();
        assert_eq!(Ok(0xDEAD_BEEF), bus.read_word(0x8000_0010));
        assert_eq!(Ok(0xEF), bus.read_byte(0x8000_0010));
        assert_eq!(Ok(0xBE), bus.read_byte(0x8000_0011));
        assert_eq!(Ok(0xBEEF), bus.read_halfword(0x8000_0010));
        assert_eq!(Ok(0xDEAD), bus.read_halfword(0x8000_0012));
    }

    #[test]
    fn test_halfword_and_byte() {
        let mut bus = bus();
        bus.write_halfword(0x8000_0001, 0xA55A).unwrap();
        assert_eq!(Ok(0x5A), bus.read_byte(0x8000_0001));
        assert_eq!(Ok(0xA5), bus.read_byte(0x8000_0002));
        bus.write_byte(0x8000_0003, 0x7F).unwrap();
        assert_eq!(Ok(0x7FA5_5A00), bus.read_word(0x8000_0000));
    }

    #[test]
    fn test_misaligned_word() {
        let mut bus = bus();
        bus.write_word(0x8000_0003, 0x0102_0304).unwrap();
        assert_eq!(Ok(0x0102_0304), bus.read_word(0x8000_0003));
        assert_eq!(Ok(0x04), bus.read_byte(0x8000_0003));
    }

    #[test]
    fn test_invalid_addresses() {
        let mut bus = bus();
        assert_eq!(
            Err(MemoryError::NotPhysical { address: 0x0000_1000 }),
            bus.read_word(0x0000_1000)
        );
        assert_eq!(
            Err(MemoryError::OutOfRange {
                address: 0x8000_1000,
                capacity: 0x1000
            }),
            bus.write_byte(0x8000_1000, 0)
        );
        // A word straddling the end of RAM
        assert!(bus.read_word(0x8000_0FFE).is_err());
    }

    #[test]
    fn test_device_windows() {
        let mut bus = bus();
        bus.write_byte(UART_RANGE.start, b'!').unwrap();
        // THR is full until the UART ticks
        assert_eq!(Ok(0x00), bus.read_byte(UART_RANGE.start + 5));
        bus.uart_mut().tick();
        assert_eq!(b"!".to_vec(), bus.uart_mut().take_output());

        bus.write_word(CLINT_RANGE.start + 0x4000, 5).unwrap();
        assert_eq!(Ok(5), bus.read_word(CLINT_RANGE.start + 0x4000));
        assert!(bus.clint_mut().take_rearmed());
    }

    #[test]
    fn test_physical_access() {
        let mut bus = bus();
        bus.write_physical(0x10, &[1, 2, 3, 4]).unwrap();
        assert_eq!(Ok(0x0403_0201), bus.read_word_pure(0x8000_0010));
        let mut buf = [0; 2];
        bus.read_physical(0x11, &mut buf).unwrap();
        assert_eq!([2, 3], buf);
        assert!(bus.write_physical(0xFFE, &[0; 4]).is_err());
        assert!(bus.read_physical(0x1000, &mut buf).is_err());
    }
}
