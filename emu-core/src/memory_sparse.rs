use std::collections::HashMap;

use log::trace;

use crate::clock::SharedClock;
use crate::memory::{Memory, MemoryError};

/// Hash-backed memory with no fixed extent. Used by tests and anywhere a
/// full 64 KiB block would be wasteful.
///
/// In strict mode, touching a cell that was never written is an error,
/// which catches programs that wander off their own code and data.
pub struct SparseMemory {
    clock: Option<SharedClock>,
    strict: bool,
    cells: HashMap<u16, u8>,
}

impl SparseMemory {
    pub fn new(clock: Option<SharedClock>) -> SparseMemory {
        SparseMemory {
            clock,
            strict: false,
            cells: HashMap::new(),
        }
    }

    pub fn strict(clock: Option<SharedClock>) -> SparseMemory {
        SparseMemory {
            clock,
            strict: true,
            cells: HashMap::new(),
        }
    }

    pub fn write_range(&mut self, address: u16, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.cells.insert(address.wrapping_add(i as u16), *byte);
        }
    }

    pub fn read_range(&self, address: u16, length: u16) -> Vec<u8> {
        (0..length)
            .map(|i| {
                self.cells
                    .get(&address.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn fill(&mut self, address: u16, length: u16, value: u8) {
        for i in 0..length {
            self.cells.insert(address.wrapping_add(i), value);
        }
    }

    fn tick(&self) {
        if let Some(clock) = &self.clock {
            clock.borrow_mut().tick();
        }
    }
}

impl Memory for SparseMemory {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        self.tick();
        match self.cells.get(&address) {
            Some(value) => {
                trace!("SPARSE READ  [{address:04x}] -> {value:02x}");
                Ok(*value)
            }
            None if self.strict => Err(MemoryError::Uninitialized { address }),
            None => Ok(0),
        }
    }

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        self.tick();
        if self.strict && !self.cells.contains_key(&address) {
            return Err(MemoryError::Uninitialized { address });
        }
        trace!("SPARSE WRITE [{address:04x}] <- {value:02x}");
        self.cells.insert(address, value);
        Ok(())
    }

    fn debug_peek(&self, address: u16) -> Option<u8> {
        self.cells.get(&address).copied()
    }
}
