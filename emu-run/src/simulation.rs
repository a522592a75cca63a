use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use emu_6502::cpu::{Cpu, ExecutionError, VerboseDebugger};
use emu_6502::instruction_set::InstructionSet;
use emu_core::clock::{Clock, SharedClock, SimpleClock, SteadyClock};
use emu_core::memory::SharedMemory;
use emu_core::memory_block::MemoryBlock;
use emu_core::memory_mapper::{MemoryMapper, OverlappingAreaError};

/// How a simulation run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The program executed HLT; the code is the process exit status.
    Halted(u8),
    /// The deadline passed before the program finished.
    TimedOut,
    /// A fatal fault with the CPU diagnostic.
    Fault(ExecutionError),
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub cycles: u64,
    pub duration: Duration,
}

/// Owns the whole machine: clock, mapper, mounted devices and the CPU. The
/// aggregate outlives every shared handle into it.
pub struct Simulation {
    clock: SharedClock,
    cpu: Cpu,
    // Keeps mounted devices alive alongside the mapper's handles.
    #[allow(dead_code)]
    devices: Vec<SharedMemory>,
}

pub struct SimulationBuilder {
    clock: SharedClock,
    mapper: MemoryMapper,
    devices: Vec<SharedMemory>,
    verbose: bool,
}

impl SimulationBuilder {
    /// `frequency` of zero runs unpaced.
    pub fn new(frequency: u64) -> Result<SimulationBuilder, emu_core::clock::ClockFrequencyError> {
        let clock: SharedClock = if frequency == 0 {
            Rc::new(RefCell::new(SimpleClock::new()))
        } else {
            Rc::new(RefCell::new(SteadyClock::new(frequency)?))
        };
        Ok(SimulationBuilder {
            mapper: MemoryMapper::new(Some(clock.clone())),
            clock,
            devices: Vec::new(),
            verbose: false,
        })
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn verbose(mut self, verbose: bool) -> SimulationBuilder {
        self.verbose = verbose;
        self
    }

    /// Mounts a RAM block over the whole address space, preloaded with a
    /// flat image (up to 64 KiB, zero-extended).
    pub fn with_ram_image(mut self, image: &[u8]) -> Result<SimulationBuilder, OverlappingAreaError> {
        let mut bytes = vec![0u8; 0x10000];
        bytes[..image.len()].copy_from_slice(image);
        let ram: SharedMemory = Rc::new(RefCell::new(
            MemoryBlock::new(None, bytes, emu_core::memory::MemoryMode::ReadWrite).with_name("ram"),
        ));
        self.mapper.map_area(0x0000, 0xFFFF, ram.clone())?;
        self.devices.push(ram);
        Ok(self)
    }

    /// Mounts a RAM block over `[lo, hi]` only, preloaded from the
    /// matching slice of the flat image. Used to leave holes for devices.
    pub fn with_ram_window(
        mut self,
        lo: u16,
        hi: u16,
        image: &[u8],
    ) -> Result<SimulationBuilder, OverlappingAreaError> {
        let size = hi as usize - lo as usize + 1;
        let mut bytes = vec![0u8; size];
        for (i, cell) in bytes.iter_mut().enumerate() {
            if let Some(byte) = image.get(lo as usize + i) {
                *cell = *byte;
            }
        }
        let ram: SharedMemory = Rc::new(RefCell::new(
            MemoryBlock::new(None, bytes, emu_core::memory::MemoryMode::ReadWrite).with_name("ram"),
        ));
        self.mapper.map_area(lo, hi, ram.clone())?;
        self.devices.push(ram);
        Ok(self)
    }

    /// Mounts an arbitrary device over `[lo, hi]`.
    pub fn with_device(
        mut self,
        lo: u16,
        hi: u16,
        device: SharedMemory,
    ) -> Result<SimulationBuilder, OverlappingAreaError> {
        self.mapper.map_area(lo, hi, device.clone())?;
        self.devices.push(device);
        Ok(self)
    }

    pub fn build(self) -> Simulation {
        let memory: SharedMemory = Rc::new(RefCell::new(self.mapper));
        let mut cpu = Cpu::new(self.clock.clone(), memory.clone(), InstructionSet::Nmos6502Emu);
        if self.verbose {
            cpu = cpu.with_debugger(Box::new(VerboseDebugger::new(
                InstructionSet::Nmos6502Emu,
                memory,
                self.clock.clone(),
            )));
        }
        Simulation {
            clock: self.clock,
            cpu,
            devices: self.devices,
        }
    }
}

impl Simulation {
    /// Resets the machine and runs until halt, fault or the optional
    /// timeout.
    pub fn run(&mut self, timeout: Option<Duration>) -> RunSummary {
        let start = std::time::Instant::now();
        self.clock.borrow_mut().reset();
        self.cpu.reset();

        let result = match timeout {
            Some(timeout) => self.cpu.execute_for(timeout),
            None => self.cpu.execute(),
        };

        let outcome = match result {
            Ok(()) => Outcome::TimedOut,
            Err(ExecutionError::Halted { code, regs }) => {
                log::debug!("HALT code {code:#04x}, registers {}", regs.dump());
                Outcome::Halted(code)
            }
            Err(error) => Outcome::Fault(error),
        };

        RunSummary {
            outcome,
            cycles: self.clock.borrow().current_cycle(),
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // LDX #$00; loop: INX; CPX #$05; BNE loop; TXA; HLT A -- plus the
    // RESET vector pointing at 0x0200.
    fn counting_image() -> Vec<u8> {
        let mut image = vec![0u8; 0x10000];
        let code = [0xA2, 0x00, 0xE8, 0xE0, 0x05, 0xD0, 0xFB, 0x8A, 0x02];
        image[0x0200..0x0200 + code.len()].copy_from_slice(&code);
        image[0xFFFC] = 0x00;
        image[0xFFFD] = 0x02;
        image
    }

    #[test]
    fn runs_an_image_to_the_halt() {
        let mut simulation = SimulationBuilder::new(0)
            .unwrap()
            .with_ram_image(&counting_image())
            .unwrap()
            .build();
        let summary = simulation.run(None);
        match summary.outcome {
            Outcome::Halted(code) => assert_eq!(code, 5),
            other => panic!("expected a halt, got {other:?}"),
        }
        assert!(summary.cycles > 0);
    }

    #[test]
    fn empty_image_loops_until_timeout() {
        // All zeros: PC lands on BRK forever through the zeroed IRQ
        // vector; bound the run with a timeout.
        let mut simulation = SimulationBuilder::new(0)
            .unwrap()
            .with_ram_image(&[])
            .unwrap()
            .build();
        let summary = simulation.run(Some(Duration::from_millis(50)));
        assert!(matches!(summary.outcome, Outcome::TimedOut));
    }

    #[test]
    fn device_mounting_rejects_overlap() {
        let builder = SimulationBuilder::new(0)
            .unwrap()
            .with_ram_image(&[])
            .unwrap();
        let device: SharedMemory = Rc::new(RefCell::new(
            emu_devices::prng::SeededPrngDevice::default(),
        ));
        assert!(builder.with_device(0x9000, 0x9005, device).is_err());
    }
}
