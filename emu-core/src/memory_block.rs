use log::trace;

use crate::clock::SharedClock;
use crate::memory::{Memory, MemoryError, MemoryMode};

/// Contiguous byte array with a write policy. RAM and ROM are both this
/// type, differing only in `MemoryMode`.
///
/// The clock handle is optional: a block mounted under the memory mapper is
/// built without one, because the mapper already pays the bus cycle for the
/// access. A block used standalone keeps its own clock.
pub struct MemoryBlock {
    clock: Option<SharedClock>,
    mode: MemoryMode,
    block: Vec<u8>,
    name: String,
}

impl MemoryBlock {
    pub fn new(clock: Option<SharedClock>, block: Vec<u8>, mode: MemoryMode) -> MemoryBlock {
        MemoryBlock {
            clock,
            mode,
            block,
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> MemoryBlock {
        self.name = name.into();
        self
    }

    /// A zero-filled read-write block.
    pub fn ram(clock: Option<SharedClock>, size: usize) -> MemoryBlock {
        MemoryBlock::new(clock, vec![0; size], MemoryMode::ReadWrite)
    }

    /// A read-only block over `image`. Stores are silently dropped.
    pub fn rom(clock: Option<SharedClock>, image: Vec<u8>) -> MemoryBlock {
        MemoryBlock::new(clock, image, MemoryMode::ReadOnly)
    }

    pub fn size(&self) -> usize {
        self.block.len()
    }

    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    fn tick(&self) {
        if let Some(clock) = &self.clock {
            clock.borrow_mut().tick();
        }
    }

    fn check_bounds(&self, address: u16) -> Result<(), MemoryError> {
        if (address as usize) < self.block.len() {
            Ok(())
        } else {
            Err(MemoryError::OutOfBounds {
                address,
                limit: self.block.len() as u32,
            })
        }
    }
}

impl Memory for MemoryBlock {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        self.check_bounds(address)?;
        self.tick();
        let value = self.block[address as usize];
        trace!("BLOCK {} READ  [{address:04x}] -> {value:02x}", self.name);
        Ok(value)
    }

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        self.check_bounds(address)?;
        self.tick();
        trace!("BLOCK {} WRITE [{address:04x}] <- {value:02x}", self.name);
        match self.mode {
            MemoryMode::ReadWrite => {
                self.block[address as usize] = value;
                Ok(())
            }
            // ROM swallows the store, the bus cycle still happened.
            MemoryMode::ReadOnly => Ok(()),
            MemoryMode::ThrowOnWrite => Err(MemoryError::ReadOnly { address }),
        }
    }

    fn debug_peek(&self, address: u16) -> Option<u8> {
        self.block.get(address as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trips_bytes() {
        let mut block = MemoryBlock::ram(None, 0x100);
        block.store(0x10, 0xAB).unwrap();
        assert_eq!(block.load(0x10).unwrap(), 0xAB);
    }

    #[test]
    fn rom_drops_stores_silently() {
        let mut block = MemoryBlock::rom(None, vec![0x11, 0x22]);
        block.store(0x00, 0xFF).unwrap();
        assert_eq!(block.load(0x00).unwrap(), 0x11);
    }

    #[test]
    fn throw_on_write_raises() {
        let mut block = MemoryBlock::new(None, vec![0; 4], MemoryMode::ThrowOnWrite);
        assert_eq!(
            block.store(0x01, 0x55),
            Err(MemoryError::ReadOnly { address: 0x01 })
        );
    }

    #[test]
    fn out_of_bounds_access_is_fatal() {
        let mut block = MemoryBlock::ram(None, 0x10);
        assert!(matches!(
            block.load(0x10),
            Err(MemoryError::OutOfBounds { address: 0x10, .. })
        ));
        assert!(matches!(
            block.store(0x20, 0),
            Err(MemoryError::OutOfBounds { address: 0x20, .. })
        ));
    }

    #[test]
    fn debug_peek_does_not_fail_out_of_range() {
        let block = MemoryBlock::ram(None, 0x10);
        assert_eq!(block.debug_peek(0x05), Some(0));
        assert_eq!(block.debug_peek(0x10), None);
    }

    #[test]
    fn attached_clock_ticks_once_per_access() {
        use crate::clock::{Clock, SimpleClock};
        use std::cell::RefCell;
        use std::rc::Rc;

        let clock = Rc::new(RefCell::new(SimpleClock::new()));
        let mut block = MemoryBlock::ram(Some(clock.clone()), 0x10);
        block.store(0x00, 1).unwrap();
        block.load(0x00).unwrap();
        assert_eq!(clock.borrow().current_cycle(), 2);
        assert_eq!(block.debug_peek(0x00), Some(1));
        // Peeks are free.
        assert_eq!(clock.borrow().current_cycle(), 2);
    }
}
