use std::collections::VecDeque;
use std::io::{Read, Write};

use emu_core::clock::SharedClock;
use emu_core::memory::{Memory, MemoryError};
use log::trace;
use thiserror::Error;

/// Register map, relative to wherever the device is mounted.
pub mod registers {
    /// Bit 0 enables the device, bits 4-6 select the baud rate.
    pub const CR0: u16 = 0;
    /// Readable depth of the input FIFO.
    pub const IN_COUNT: u16 = 1;
    /// Readable depth of the output FIFO.
    pub const OUT_COUNT: u16 = 2;
    /// Read pulls from the input FIFO, write appends to the output FIFO.
    pub const FIFO: u16 = 3;
}

pub const DEVICE_SIZE: u16 = 4;
pub const DEFAULT_FIFO_DEPTH: usize = 16;
pub const MAX_FIFO_DEPTH: usize = 255;

const CR0_ENABLE_BIT: u8 = 0x01;
const CR0_RATE_SHIFT: u8 = 4;
const CR0_RATE_MASK: u8 = 0b0111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    pub fn selector(self) -> u8 {
        match self {
            BaudRate::B1200 => 0,
            BaudRate::B2400 => 1,
            BaudRate::B4800 => 2,
            BaudRate::B9600 => 3,
            BaudRate::B19200 => 4,
            BaudRate::B38400 => 5,
            BaudRate::B57600 => 6,
            BaudRate::B115200 => 7,
        }
    }

    pub fn from_selector(selector: u8) -> BaudRate {
        match selector & CR0_RATE_MASK {
            0 => BaudRate::B1200,
            1 => BaudRate::B2400,
            2 => BaudRate::B4800,
            3 => BaudRate::B9600,
            4 => BaudRate::B19200,
            5 => BaudRate::B38400,
            6 => BaudRate::B57600,
            _ => BaudRate::B115200,
        }
    }

    pub fn bits_per_second(self) -> u64 {
        match self {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    pub fn bytes_per_second(self) -> u64 {
        self.bits_per_second() / 8
    }
}

#[derive(Debug, Error)]
#[error("tty fifo depth {depth} does not fit the 8-bit count registers")]
pub struct FifoDepthError {
    pub depth: usize,
}

/// Memory-mapped serial endpoint over a pair of host streams.
///
/// Byte movement is budgeted by wall time: on each register access the
/// device computes how many byte slots elapsed since the previous access at
/// the current rate, moves that many bytes between the FIFOs and the host
/// streams, and only then services the access. State therefore changes
/// lazily, at the next access that touches the device.
pub struct TtyDevice {
    input: Option<Box<dyn Read>>,
    output: Option<Box<dyn Write>>,
    clock: SharedClock,
    fifo_depth: usize,

    baud: BaudRate,
    enabled: bool,
    start_time: f64,
    processed_bytes: u64,
    input_exhausted: bool,

    input_queue: VecDeque<u8>,
    output_queue: VecDeque<u8>,
}

impl TtyDevice {
    pub fn new(
        input: Option<Box<dyn Read>>,
        output: Option<Box<dyn Write>>,
        clock: SharedClock,
        baud: BaudRate,
        fifo_depth: usize,
        enabled: bool,
    ) -> Result<TtyDevice, FifoDepthError> {
        if fifo_depth == 0 || fifo_depth > MAX_FIFO_DEPTH {
            return Err(FifoDepthError { depth: fifo_depth });
        }
        let mut device = TtyDevice {
            input,
            output,
            clock,
            fifo_depth,
            baud,
            enabled: false,
            start_time: 0.0,
            processed_bytes: 0,
            input_exhausted: false,
            input_queue: VecDeque::new(),
            output_queue: VecDeque::new(),
        };
        device.set_enabled(enabled);
        device.set_rate(baud);
        Ok(device)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.start_time = self.clock.borrow().time();
            self.processed_bytes = 0;
        }
    }

    pub fn set_rate(&mut self, baud: BaudRate) {
        self.baud = baud;
    }

    fn control_register(&self) -> u8 {
        let mut value = self.baud.selector() << CR0_RATE_SHIFT;
        if self.enabled {
            value |= CR0_ENABLE_BIT;
        }
        value
    }

    /// Byte slots elapsed since the last pump at the current rate.
    fn byte_delta(&mut self) -> u64 {
        let elapsed = self.clock.borrow().time() - self.start_time;
        let total = (elapsed.max(0.0) * self.baud.bytes_per_second() as f64) as u64;
        let delta = total.saturating_sub(self.processed_bytes);
        self.processed_bytes = total;
        delta
    }

    fn update_buffers(&mut self) {
        let budget = self.byte_delta();
        if budget == 0 {
            return;
        }

        if self.enabled {
            if let Some(output) = &mut self.output {
                for _ in 0..budget {
                    let Some(byte) = self.output_queue.pop_front() else {
                        break;
                    };
                    if output.write_all(&[byte]).is_err() {
                        break;
                    }
                }
                let _ = output.flush();
            }
        }

        if let Some(input) = &mut self.input {
            if !self.input_exhausted {
                for _ in 0..budget {
                    let mut byte = [0u8];
                    match input.read(&mut byte) {
                        Ok(1) => {
                            self.input_queue.push_back(byte[0]);
                            if self.input_queue.len() > self.fifo_depth {
                                self.input_queue.pop_front();
                            }
                        }
                        _ => {
                            self.input_exhausted = true;
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Memory for TtyDevice {
    fn load(&mut self, address: u16) -> Result<u8, MemoryError> {
        self.update_buffers();
        let value = match address {
            registers::CR0 => self.control_register(),
            registers::IN_COUNT => self.input_queue.len() as u8,
            registers::OUT_COUNT => self.output_queue.len() as u8,
            registers::FIFO => self.input_queue.pop_front().unwrap_or(0),
            _ => {
                return Err(MemoryError::OutOfBounds {
                    address,
                    limit: DEVICE_SIZE as u32,
                })
            }
        };
        trace!("TTY READ  [{address:04x}] -> {value:02x}");
        Ok(value)
    }

    fn store(&mut self, address: u16, value: u8) -> Result<(), MemoryError> {
        trace!("TTY WRITE [{address:04x}] <- {value:02x}");
        match address {
            registers::CR0 => {
                // The pump runs against the old settings first.
                self.update_buffers();
                self.set_enabled(value & CR0_ENABLE_BIT != 0);
                self.set_rate(BaudRate::from_selector(value >> CR0_RATE_SHIFT));
                Ok(())
            }
            registers::FIFO => {
                self.output_queue.push_back(value);
                if self.output_queue.len() > self.fifo_depth {
                    self.output_queue.pop_front();
                }
                self.update_buffers();
                Ok(())
            }
            registers::IN_COUNT | registers::OUT_COUNT => {
                // Count registers ignore writes.
                self.update_buffers();
                Ok(())
            }
            _ => Err(MemoryError::OutOfBounds {
                address,
                limit: DEVICE_SIZE as u32,
            }),
        }
    }

    fn debug_peek(&self, address: u16) -> Option<u8> {
        match address {
            registers::CR0 => Some(self.control_register()),
            registers::IN_COUNT => Some(self.input_queue.len() as u8),
            registers::OUT_COUNT => Some(self.output_queue.len() as u8),
            // Peeking must not drain the FIFO.
            registers::FIFO => Some(self.input_queue.front().copied().unwrap_or(0)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    use emu_core::clock::Clock;

    use super::*;

    /// A clock whose time is set by hand, so byte budgets are exact.
    #[derive(Default)]
    struct ManualClock {
        cycle: u64,
        time: f64,
    }

    impl Clock for ManualClock {
        fn tick(&mut self) {
            self.cycle += 1;
        }
        fn reset(&mut self) {
            self.cycle = 0;
            self.time = 0.0;
        }
        fn current_cycle(&self) -> u64 {
            self.cycle
        }
        fn time(&self) -> f64 {
            self.time
        }
    }

    struct Fixture {
        clock: Rc<RefCell<ManualClock>>,
        device: TtyDevice,
        output: Rc<RefCell<Vec<u8>>>,
    }

    /// Shared buffer so the test can inspect what the device wrote.
    struct SharedWriter(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fixture(input: &[u8]) -> Fixture {
        let clock = Rc::new(RefCell::new(ManualClock::default()));
        let output = Rc::new(RefCell::new(Vec::new()));
        let device = TtyDevice::new(
            Some(Box::new(Cursor::new(input.to_vec()))),
            Some(Box::new(SharedWriter(output.clone()))),
            clock.clone(),
            BaudRate::B9600,
            DEFAULT_FIFO_DEPTH,
            true,
        )
        .unwrap();
        Fixture {
            clock,
            device,
            output,
        }
    }

    fn advance(fixture: &Fixture, seconds: f64) {
        fixture.clock.borrow_mut().time += seconds;
    }

    #[test]
    fn no_time_no_bytes() {
        let mut f = fixture(b"hello");
        assert_eq!(f.device.load(registers::IN_COUNT).unwrap(), 0);
    }

    #[test]
    fn input_arrives_at_the_byte_rate() {
        let mut f = fixture(b"hello");
        // 9600 baud is 1200 bytes/s; three byte slots and a bit of margin
        // against floating-point truncation.
        advance(&f, 3.5 / 1200.0);
        assert_eq!(f.device.load(registers::IN_COUNT).unwrap(), 3);
        assert_eq!(f.device.load(registers::FIFO).unwrap(), b'h');
        assert_eq!(f.device.load(registers::FIFO).unwrap(), b'e');
        assert_eq!(f.device.load(registers::IN_COUNT).unwrap(), 1);
    }

    #[test]
    fn empty_fifo_reads_zero() {
        let mut f = fixture(b"");
        advance(&f, 1.0);
        assert_eq!(f.device.load(registers::FIFO).unwrap(), 0);
    }

    #[test]
    fn output_drains_with_the_budget() {
        let mut f = fixture(b"");
        f.device.store(registers::FIFO, b'H').unwrap();
        f.device.store(registers::FIFO, b'i').unwrap();
        assert_eq!(f.device.load(registers::OUT_COUNT).unwrap(), 2);
        assert!(f.output.borrow().is_empty());

        advance(&f, 10.0 / 1200.0);
        f.device.load(registers::OUT_COUNT).unwrap();
        assert_eq!(&*f.output.borrow(), b"Hi");
    }

    #[test]
    fn input_fifo_drops_the_oldest_on_overflow() {
        let bytes: Vec<u8> = (0..40).collect();
        let mut f = fixture(&bytes);
        advance(&f, 1.0);
        assert_eq!(
            f.device.load(registers::IN_COUNT).unwrap() as usize,
            DEFAULT_FIFO_DEPTH
        );
        // The first bytes were dropped; the oldest survivor is 40 - 16.
        assert_eq!(f.device.load(registers::FIFO).unwrap(), 40 - 16);
    }

    #[test]
    fn control_register_round_trips() {
        let mut f = fixture(b"");
        let cr0 = f.device.load(registers::CR0).unwrap();
        assert_eq!(cr0 & CR0_ENABLE_BIT, 1);
        assert_eq!(BaudRate::from_selector(cr0 >> CR0_RATE_SHIFT), BaudRate::B9600);

        // Disable and switch to 115200.
        f.device
            .store(registers::CR0, 7 << CR0_RATE_SHIFT)
            .unwrap();
        let cr0 = f.device.load(registers::CR0).unwrap();
        assert_eq!(cr0 & CR0_ENABLE_BIT, 0);
        assert_eq!(
            BaudRate::from_selector(cr0 >> CR0_RATE_SHIFT),
            BaudRate::B115200
        );
    }

    #[test]
    fn disabled_device_does_not_emit_output() {
        let mut f = fixture(b"");
        f.device.store(registers::CR0, 3 << CR0_RATE_SHIFT).unwrap();
        f.device.store(registers::FIFO, b'X').unwrap();
        advance(&f, 1.0);
        f.device.load(registers::OUT_COUNT).unwrap();
        assert!(f.output.borrow().is_empty());
    }

    #[test]
    fn out_of_range_register_is_fatal() {
        let mut f = fixture(b"");
        assert!(matches!(
            f.device.load(4),
            Err(MemoryError::OutOfBounds { address: 4, .. })
        ));
        assert!(matches!(
            f.device.store(7, 0),
            Err(MemoryError::OutOfBounds { address: 7, .. })
        ));
    }

    #[test]
    fn debug_peek_never_drains() {
        let mut f = fixture(b"A");
        advance(&f, 1.5 / 1200.0);
        f.device.load(registers::IN_COUNT).unwrap();
        assert_eq!(f.device.debug_peek(registers::FIFO), Some(b'A'));
        assert_eq!(f.device.debug_peek(registers::FIFO), Some(b'A'));
        assert_eq!(f.device.load(registers::FIFO).unwrap(), b'A');
        assert_eq!(f.device.debug_peek(4), None);
    }

    #[test]
    fn oversized_fifo_depth_is_rejected() {
        let clock: SharedClock = Rc::new(RefCell::new(ManualClock::default()));
        assert!(TtyDevice::new(None, None, clock, BaudRate::B9600, 256, false).is_err());
    }
}
