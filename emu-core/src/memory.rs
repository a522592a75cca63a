use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Write policy for a memory device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    ReadOnly,
    ReadWrite,
    ThrowOnWrite,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of bounds access at {address:#06x}, device limit is {limit:#06x}")]
    OutOfBounds { address: u16, limit: u32 },

    #[error("access to unmapped address {address:#06x}")]
    Unmapped { address: u16 },

    #[error("write to read-only address {address:#06x}")]
    ReadOnly { address: u16 },

    #[error("access to uninitialized address {address:#06x}")]
    Uninitialized { address: u16 },
}

/// A memory-mapped device covering a 16-bit address window. Addresses are
/// relative to wherever the device is mounted.
///
/// `load` and `store` account for the bus cycle when the device owns a clock
/// handle; `debug_peek` never does and never has side effects visible to the
/// program, which makes it safe for the disassembler and for tests.
pub trait Memory {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError>;

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError>;

    /// Returns `None` for addresses that are not readable without side
    /// effects (write-only registers, untouched sparse cells).
    fn debug_peek(&self, address: u16) -> Option<u8>;
}

pub type SharedMemory = Rc<RefCell<dyn Memory>>;
