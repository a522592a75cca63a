use emu_core::memory::{Memory, MemoryError};
use log::{debug, trace};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

/// Register map of the seeded generator.
pub mod registers {
    /// Little-endian 32-bit seed; writing any byte reseeds the generator.
    pub const SEED0: u16 = 0;
    pub const SEED1: u16 = 1;
    pub const SEED2: u16 = 2;
    pub const SEED3: u16 = 3;
    /// Each read produces one uniform byte.
    pub const ENTROPY: u16 = 4;
    pub const CR0: u16 = 5;
}

pub const SEEDED_DEVICE_SIZE: u16 = 6;
pub const DEFAULT_SEED: u32 = 0xDEAD_BEEF;

/// Deterministic pseudo-random source: a 32-bit seed exposed over four
/// registers plus an entropy register. Reproducible runs reseed through the
/// registers; the generator state itself is not memory-mapped.
pub struct SeededPrngDevice {
    rng: StdRng,
    seed: u32,
    control: u8,
}

impl SeededPrngDevice {
    pub fn new(seed: u32) -> SeededPrngDevice {
        SeededPrngDevice {
            rng: StdRng::seed_from_u64(seed as u64),
            seed,
            control: 0,
        }
    }

    fn reseed(&mut self, seed: u32) {
        debug!("PRNG reseed {seed:08x}");
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed as u64);
    }

    fn seed_byte(&self, register: u16) -> u8 {
        (self.seed >> (register * 8)) as u8
    }
}

impl Default for SeededPrngDevice {
    fn default() -> SeededPrngDevice {
        SeededPrngDevice::new(DEFAULT_SEED)
    }
}

impl Memory for SeededPrngDevice {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        let value = match address {
            registers::SEED0..=registers::SEED3 => self.seed_byte(address),
            registers::ENTROPY => self.rng.gen(),
            registers::CR0 => self.control,
            _ => {
                return Err(MemoryError::OutOfBounds {
                    address,
                    limit: SEEDED_DEVICE_SIZE as u32,
                })
            }
        };
        trace!("PRNG READ  [{address:04x}] -> {value:02x}");
        Ok(value)
    }

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        trace!("PRNG WRITE [{address:04x}] <- {value:02x}");
        match address {
            registers::SEED0..=registers::SEED3 => {
                let shift = address * 8;
                let seed = (self.seed & !(0xFFu32 << shift)) | ((value as u32) << shift);
                self.reseed(seed);
                Ok(())
            }
            registers::ENTROPY => {
                // Writing entropy does nothing.
                Ok(())
            }
            registers::CR0 => {
                self.control = value;
                Ok(())
            }
            _ => Err(MemoryError::OutOfBounds {
                address,
                limit: SEEDED_DEVICE_SIZE as u32,
            }),
        }
    }

    fn debug_peek(&self, address: u16) -> Option<u8> {
        match address {
            registers::SEED0..=registers::SEED3 => Some(self.seed_byte(address)),
            // Peeking entropy would consume generator state.
            registers::ENTROPY => None,
            registers::CR0 => Some(self.control),
            _ => None,
        }
    }
}

/// One entropy byte straight from the operating system. Writes are ignored,
/// reads never repeat deterministically.
#[derive(Default)]
pub struct OsRandomDevice;

impl OsRandomDevice {
    pub const DEVICE_SIZE: u16 = 1;

    pub fn new() -> OsRandomDevice {
        OsRandomDevice
    }
}

impl Memory for OsRandomDevice {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        if address >= Self::DEVICE_SIZE {
            return Err(MemoryError::OutOfBounds {
                address,
                limit: Self::DEVICE_SIZE as u32,
            });
        }
        Ok(OsRng.next_u32() as u8)
    }

    fn store(&mut self, address: u16, _value: u8) -> Result<(), MemoryError> {
        if address >= Self::DEVICE_SIZE {
            return Err(MemoryError::OutOfBounds {
                address,
                limit: Self::DEVICE_SIZE as u32,
            });
        }
        trace!("RANDOM WRITE ignored");
        Ok(())
    }

    fn debug_peek(&self, _address: u16) -> Option<u8> {
        None
    }
}
