mod addressing;
mod debugger;
mod instructions;
mod registers;

#[cfg(test)]
mod test_helpers;


use std::time::{Duration, Instant};

use emu_core::clock::SharedClock;
use emu_core::memory::{MemoryError, SharedMemory};
use thiserror::Error;

use crate::instruction_set::InstructionSet;
use crate::vectors::{IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};

pub use debugger::{disassemble, Debugger, Disassembly, VerboseDebugger};
pub use registers::{Flag, Registers};

pub(crate) use instructions::handler_table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Nmi,
    Irq,
    Brk,
    Reset,
}

impl Interrupt {
    pub fn vector_address(self) -> u16 {
        match self {
            Interrupt::Nmi => NMI_VECTOR,
            Interrupt::Irq | Interrupt::Brk => IRQ_VECTOR,
            Interrupt::Reset => RESET_VECTOR,
        }
    }

    /// Only IRQ honors the interrupt-disable flag.
    pub fn maskable(self) -> bool {
        self == Interrupt::Irq
    }
}

/// How one instruction (or the whole run) ended abnormally. `Halted` is the
/// program's controlled termination channel, not a failure; everything else
/// is fatal.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("execution halted with code {code:#04x}")]
    Halted { code: u8, regs: Registers },

    #[error("invalid opcode {opcode:#04x} at address {address:#06x}")]
    InvalidOpcode {
        opcode: u8,
        address: u16,
        regs: Registers,
    },

    #[error("decimal mode arithmetic is not supported")]
    UnsupportedOperation { regs: Registers },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub struct Cpu {
    pub reg: Registers,
    pub memory: SharedMemory,
    pub clock: SharedClock,
    pending_interrupt: Option<Interrupt>,
    debugger: Option<Box<dyn Debugger>>,
    handlers: &'static instructions::HandlerTable,
}

impl Cpu {
    pub fn new(clock: SharedClock, memory: SharedMemory, set: InstructionSet) -> Cpu {
        Cpu {
            reg: Registers::new(),
            memory,
            clock,
            pending_interrupt: None,
            debugger: None,
            handlers: handler_table(set),
        }
    }

    pub fn with_debugger(mut self, debugger: Box<dyn Debugger>) -> Cpu {
        self.debugger = Some(debugger);
        self
    }

    /// Zeroes the register file and latches the RESET interrupt; the next
    /// executed step loads PC from the vector at 0xFFFC.
    pub fn reset(&mut self) {
        self.reg.reset();
        self.pending_interrupt = Some(Interrupt::Reset);
    }

    /// Latches an externally raised interrupt. A masked IRQ stays latched
    /// until the interrupt-disable flag clears.
    pub fn trigger_interrupt(&mut self, interrupt: Interrupt) {
        self.pending_interrupt = Some(interrupt);
    }

    /// Runs until the program halts or faults.
    pub fn execute(&mut self) -> Result<(), ExecutionError> {
        loop {
            self.execute_next_instruction()?;
        }
    }

    /// Runs for at most `timeout` of wall time; cancellation is
    /// instruction-granular. `Ok(())` means the deadline passed.
    pub fn execute_for(&mut self, timeout: Duration) -> Result<(), ExecutionError> {
        self.execute_until(Instant::now() + timeout)
    }

    pub fn execute_until(&mut self, deadline: Instant) -> Result<(), ExecutionError> {
        while Instant::now() < deadline {
            self.execute_next_instruction()?;
        }
        Ok(())
    }

    /// One iteration of the fetch-decode-execute loop, spec'd by hardware:
    /// service a pending interrupt, fetch the opcode (the bus access pays
    /// the cycle), dispatch, then give the debugger a look before the next
    /// fetch.
    pub fn execute_next_instruction(&mut self) -> Result<(), ExecutionError> {
        if let Some(interrupt) = self.pending_interrupt {
            if !interrupt.maskable() || !self.reg.test_flag(Flag::InterruptDisable) {
                self.pending_interrupt = None;
                instructions::handle_interrupt(self, interrupt)?;
            }
        }

        let address = self.reg.pc;
        let opcode = addressing::fetch_next_byte(self)?;
        let entry = self.handlers[opcode as usize].ok_or(ExecutionError::InvalidOpcode {
            opcode,
            address,
            regs: self.reg,
        })?;
        (entry.operation)(self, entry.mode)?;

        if let Some(mut debugger) = self.debugger.take() {
            debugger.on_next_instruction(&self.reg);
            self.debugger = Some(debugger);
        }
        Ok(())
    }

    pub(crate) fn internal_tick(&self) {
        self.clock.borrow_mut().tick();
    }

    pub(crate) fn load(&mut self, address: u16) -> Result<u8, ExecutionError> {
        Ok(self.memory.borrow_mut().load(address)?)
    }

    pub(crate) fn store(&mut self, address: u16, value: u8) -> Result<(), ExecutionError> {
        Ok(self.memory.borrow_mut().store(address, value)?)
    }

    pub(crate) fn set_pending_interrupt(&mut self, interrupt: Interrupt) {
        self.pending_interrupt = Some(interrupt);
    }
}
