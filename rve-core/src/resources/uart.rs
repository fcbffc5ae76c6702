//! Implementation of an 8250-style UART as a memory-mapped device.

use crate::bus::Bus;
use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::warn;
use std::collections::VecDeque;
use thiserror::Error;

/// Interrupt Enable Register: received data available.
const IER_RX: u8 = 0x01;
/// Interrupt Enable Register: transmitter holding register empty.
const IER_THRE: u8 = 0x02;

const IIR_THR_EMPTY: u8 = 0x2;
const IIR_RD_AVAILABLE: u8 = 0x4;
const IIR_NO_INTERRUPT: u8 = 0x7;

const LSR_DATA_AVAILABLE: u8 = 0x01;
const LSR_THR_EMPTY: u8 = 0x20;
const LSR_TX_EMPTY: u8 = 0x40;

/// UART with single-byte holding registers and no FIFOs.
///
/// The guest side is the [`Bus`] interface (byte offsets `0..=7`). The host side feeds received
/// bytes in with [`Uart::push_input`] and collects transmitted bytes with [`Uart::take_output`].
/// Bytes only move between the holding registers and the host queues on [`Uart::tick`].
///
/// Resources:
/// - <https://uart16550.readthedocs.io>
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Uart {
    state: State,
    rx_queue: VecDeque<u8>,
    tx_output: Vec<u8>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Register {
    /// Receiver Buffer Register
    Rbr,
    /// Transmitter Holding Register
    Thr,
    /// Interrupt Enable Register
    Ier,
    /// Interrupt Identification Register
    Iir,
    /// Line Control Register
    Lcr,
    /// Modem Control Register
    Mcr,
    /// Line Status Register
    Lsr,
    /// Scratch Register
    Scr,
}

impl Register {
    /// Returns the index of the packed word holding this register, and its bit offset within it.
    fn location(self) -> (usize, usize) {
        match self {
            Self::Rbr => (0, 0),
            Self::Thr => (0, 8),
            Self::Ier => (0, 16),
            Self::Iir => (0, 24),
            Self::Lcr => (1, 0),
            Self::Mcr => (1, 8),
            Self::Lsr => (1, 16),
            Self::Scr => (1, 24),
        }
    }
}

/// Register state, packed as `[rbr_thr_ier_iir, lcr_mcr_lsr_scr]`.
#[derive(Debug, Clone, Eq, PartialEq)]
struct State {
    words: [u32; 2],
    /// Set once the guest has read a THR-empty identification from IIR, until the next transmit.
    thre_acknowledged: bool,
}

impl State {
    /// Returns the reset state.
    fn new() -> Self {
        let mut state = Self {
            words: [0; 2],
            thre_acknowledged: false,
        };
        state.set(Register::Lsr, LSR_THR_EMPTY | LSR_TX_EMPTY);
        state.update_iir();
        state
    }

    fn get(&self, register: Register) -> u8 {
        let (word, offset) = register.location();
        self.words[word].view_bits::<Lsb0>()[offset..offset + 8].load_le()
    }

    fn set(&mut self, register: Register, value: u8) {
        let (word, offset) = register.location();
        self.words[word].view_bits_mut::<Lsb0>()[offset..offset + 8].store_le(value);
    }

    fn lsr(&self, mask: u8) -> bool {
        self.get(Register::Lsr) & mask != 0
    }

    fn set_lsr(&mut self, mask: u8, value: bool) {
        let lsr = self.get(Register::Lsr);
        self.set(Register::Lsr, if value { lsr | mask } else { lsr & !mask });
    }

    /// Returns `true` if the Divisor Latch Access Bit is `1`.
    fn dlab(&self) -> bool {
        (self.get(Register::Lcr) >> 7) == 1
    }

    /// Recomputes IIR. Received data takes priority over an empty transmitter.
    fn update_iir(&mut self) {
        let ier = self.get(Register::Ier);
        let rx_ip = ier & IER_RX != 0 && self.lsr(LSR_DATA_AVAILABLE);
        let thre_ip = ier & IER_THRE != 0 && self.lsr(LSR_THR_EMPTY) && !self.thre_acknowledged;
        let iir = if rx_ip {
            IIR_RD_AVAILABLE
        } else if thre_ip {
            IIR_THR_EMPTY
        } else {
            IIR_NO_INTERRUPT
        };
        self.set(Register::Iir, iir);
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("cannot write to read-only register ({0})")]
    ReadOnly(&'static str),
    #[error("no register mapped to offset {0:#x}")]
    AddressInvalid(u32),
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl Uart {
    /// Create new UART in reset state.
    pub fn new() -> Self {
        Self {
            state: State::new(),
            rx_queue: VecDeque::new(),
            tx_output: Vec::new(),
        }
    }

    /// Restart the UART, setting everything to its reset state. Pending host bytes are dropped.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn read(&mut self, offset: u32) -> Result<u8, AccessError> {
        let value = match offset {
            0 if self.state.dlab() => 0,
            0 => {
                let value = self.state.get(Register::Rbr);
                self.state.set(Register::Rbr, 0);
                self.state.set_lsr(LSR_DATA_AVAILABLE, false);
                self.state.update_iir();
                value
            }
            2 => {
                let value = self.state.get(Register::Iir);
                if value == IIR_THR_EMPTY {
                    self.state.thre_acknowledged = true;
                    self.state.update_iir();
                }
                value
            }
            _ => self.read_pure(offset)?,
        };
        Ok(value)
    }

    /// Same as [`Self::read`] but without performing side effects (i.e. no state is mutated).
    pub fn read_pure(&self, offset: u32) -> Result<u8, AccessError> {
        let state = &self.state;
        let value = match offset {
            0 | 1 if state.dlab() => 0,
            0 => state.get(Register::Rbr),
            1 => state.get(Register::Ier),
            2 => state.get(Register::Iir),
            3 => state.get(Register::Lcr),
            4 => state.get(Register::Mcr),
            5 => state.get(Register::Lsr),
            // Modem Status Register, no modem is attached
            6 => 0,
            7 => state.get(Register::Scr),
            _ => return Err(AccessError::AddressInvalid(offset)),
        };
        Ok(value)
    }

    pub fn write(&mut self, offset: u32, value: u8) -> Result<(), AccessError> {
        let state = &mut self.state;
        match offset {
            // Divisor latch, the baud rate is not simulated
            0 | 1 if state.dlab() => {}
            0 => {
                state.set(Register::Thr, value);
                state.set_lsr(LSR_THR_EMPTY | LSR_TX_EMPTY, false);
                state.thre_acknowledged = false;
            }
            1 => {
                state.set(Register::Ier, value & 0x0F);
                state.thre_acknowledged = false;
            }
            // FIFO Control Register, there are no FIFOs
            2 => {}
            3 => state.set(Register::Lcr, value),
            4 => state.set(Register::Mcr, value),
            5 => return Err(AccessError::ReadOnly("Line Status Register")),
            6 => return Err(AccessError::ReadOnly("Modem Status Register")),
            7 => state.set(Register::Scr, value),
            _ => return Err(AccessError::AddressInvalid(offset)),
        }
        state.update_iir();
        Ok(())
    }

    /// Moves a pending THR byte to the host output, and the next host input byte into RBR if the
    /// guest has consumed the previous one.
    pub fn tick(&mut self) {
        let state = &mut self.state;
        if !state.lsr(LSR_THR_EMPTY) {
            self.tx_output.push(state.get(Register::Thr));
            state.set(Register::Thr, 0);
            state.set_lsr(LSR_THR_EMPTY | LSR_TX_EMPTY, true);
            state.thre_acknowledged = false;
        }
        if !state.lsr(LSR_DATA_AVAILABLE) {
            if let Some(byte) = self.rx_queue.pop_front() {
                state.set(Register::Rbr, byte);
                state.set_lsr(LSR_DATA_AVAILABLE, true);
            }
        }
        state.update_iir();
    }

    /// Returns `true` if IIR currently identifies a pending interrupt.
    pub fn is_interrupting(&self) -> bool {
        self.state.get(Register::Iir) != IIR_NO_INTERRUPT
    }
}

// Methods meant to be used by the host side of the UART
impl Uart {
    /// Queues bytes to be received by the guest, one per [`Self::tick`] at most.
    pub fn push_input(&mut self, input: &[u8]) {
        self.rx_queue.extend(input);
    }

    /// Returns `true` if the guest has transmitted bytes not yet taken by the host.
    pub fn has_output(&self) -> bool {
        !self.tx_output.is_empty()
    }

    /// Drains all bytes transmitted by the guest so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx_output)
    }
}

impl Bus for Uart {
    /// Every byte of `buf` is an access to the register at the corresponding offset. Invalid
    /// offsets leave their byte untouched.
    fn read(&mut self, buf: &mut [u8], address: u32) {
        for (offset, byte) in (address..).zip(buf.iter_mut()) {
            match Uart::read(self, offset) {
                Ok(value) => *byte = value,
                Err(err) => warn!("uart read: {err}"),
            }
        }
    }

    fn read_pure(&self, buf: &mut [u8], address: u32) {
        for (offset, byte) in (address..).zip(buf.iter_mut()) {
            if let Ok(value) = Uart::read_pure(self, offset) {
                *byte = value;
            }
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        for (offset, &value) in (address..).zip(buf.iter()) {
            if let Err(err) = Uart::write(self, offset, value) {
                warn!("uart write: {err}");
            }
        }
    }
}
