//! Memory resources and I/O devices attached to the system bus.

pub mod ram;
pub mod uart;
