//! Defines the interface memory-mapped devices expose to the system bus.

use std::fmt::Debug;

/// A byte-addressed slave on the system bus.
///
/// Addresses passed to a device are relative to the start of the window it is mapped at. Values
/// are serialized in little-endian byte order, and accesses can be made for any `(address, size)`
/// pair: devices decide themselves how to treat sizes and alignments they don't support, but must
/// never panic on them. An unsupported access may leave the *simulated* device in an undefined
/// state. It must still be deterministic, so two identical accesses on the same state behave the
/// same regardless of what `buf` held beforehand.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    ///
    /// Reads may have side effects, e.g. popping a received byte off a UART.
    fn read(&mut self, buf: &mut [u8], address: u32);

    /// Same as [`Bus::read`], but guaranteed not to mutate any state.
    ///
    /// Registers whose reads have side effects are peeked at instead.
    fn read_pure(&self, buf: &mut [u8], address: u32);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&mut self, address: u32, buf: &[u8]);
}
