use log::trace;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::memory::{Memory, MemoryError, SharedMemory};

#[derive(Debug, Error)]
#[error("mapped ranges overlap: {new_lo:04x}:{new_hi:04x} collides with {old_lo:04x}:{old_hi:04x}")]
pub struct OverlappingAreaError {
    pub new_lo: u16,
    pub new_hi: u16,
    pub old_lo: u16,
    pub old_hi: u16,
}

struct Area {
    lo: u16,
    hi: u16,
    device: SharedMemory,
}

/// Routes 16-bit bus accesses to the owning device.
///
/// Areas are closed intervals `[lo, hi]`, kept sorted and non-overlapping.
/// Each load or store costs exactly one clock cycle here; mounted devices
/// are expected to be clockless so the cycle is not paid twice. Addresses
/// are rebased to the device (`addr - lo`) before delegation.
pub struct MemoryMapper {
    clock: Option<SharedClock>,
    areas: Vec<Area>,
}

impl MemoryMapper {
    pub fn new(clock: Option<SharedClock>) -> MemoryMapper {
        MemoryMapper {
            clock,
            areas: Vec::new(),
        }
    }

    /// Mount `device` over `[lo, hi]`. Overlapping an existing area is a
    /// build-time error; the interval set never changes during execution.
    pub fn map_area(
        &mut self,
        lo: u16,
        hi: u16,
        device: SharedMemory,
    ) -> Result<(), OverlappingAreaError> {
        debug_assert!(lo <= hi);
        for area in &self.areas {
            if lo <= area.hi && area.lo <= hi {
                return Err(OverlappingAreaError {
                    new_lo: lo,
                    new_hi: hi,
                    old_lo: area.lo,
                    old_hi: area.hi,
                });
            }
        }
        let index = self
            .areas
            .partition_point(|area| area.lo < lo);
        self.areas.insert(index, Area { lo, hi, device });
        Ok(())
    }

    fn lookup(&self, address: u16) -> Option<&Area> {
        let index = self.areas.partition_point(|area| area.hi < address);
        self.areas
            .get(index)
            .filter(|area| area.lo <= address && address <= area.hi)
    }

    fn tick(&self) {
        if let Some(clock) = &self.clock {
            clock.borrow_mut().tick();
        }
    }
}

impl Memory for MemoryMapper {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        self.tick();
        match self.lookup(address) {
            Some(area) => {
                let value = area.device.borrow_mut().load(address - area.lo)?;
                trace!("MAPPER READ  [{address:04x}] -> {value:02x}");
                Ok(value)
            }
            None => {
                trace!("MAPPER READ  [{address:04x}] NOT MAPPED");
                Err(MemoryError::Unmapped { address })
            }
        }
    }

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        self.tick();
        match self.lookup(address) {
            Some(area) => {
                trace!("MAPPER WRITE [{address:04x}] <- {value:02x}");
                area.device.borrow_mut().store(address - area.lo, value)
            }
            None => {
                trace!("MAPPER WRITE [{address:04x}] NOT MAPPED");
                Err(MemoryError::Unmapped { address })
            }
        }
    }

    fn debug_peek(&self, address: u16) -> Option<u8> {
        self.lookup(address)
            .and_then(|area| area.device.borrow().debug_peek(address - area.lo))
    }
}
