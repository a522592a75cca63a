use std::collections::HashMap;

use emu_core::clock::SharedClock;
use emu_core::memory::SharedMemory;

use super::registers::Registers;
use crate::instruction_set::{opcode_map, AddressMode, InstructionSet, OpcodeInfo};

/// Invoked synchronously before each instruction fetch with a snapshot of
/// the registers. Implementations may read CPU and memory state through the
/// debug-peek path, never write.
pub trait Debugger {
    fn on_next_instruction(&mut self, regs: &Registers);
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub mnemonic: &'static str,
    pub mode: AddressMode,
    /// Operand rendered in assembler syntax, empty for implied.
    pub operand: String,
    /// Opcode plus operand bytes.
    pub length: u16,
}

fn format_operand(
    mode: AddressMode,
    address: u16,
    low: Option<u8>,
    high: Option<u8>,
) -> Option<String> {
    use AddressMode::*;
    let text = match mode {
        Implied => String::new(),
        RegisterA => "A".to_string(),
        Immediate => format!("#${:02x}", low?),
        ZeroPage => format!("${:02x}", low?),
        ZeroPageX => format!("${:02x},X", low?),
        ZeroPageY => format!("${:02x},Y", low?),
        Absolute => format!("${:02x}{:02x}", high?, low?),
        AbsoluteIndexedX => format!("${:02x}{:02x},X", high?, low?),
        AbsoluteIndexedY => format!("${:02x}{:02x},Y", high?, low?),
        IndirectX => format!("(${:02x},X)", low?),
        IndirectY => format!("(${:02x}),Y", low?),
        Indirect => format!("(${:02x}{:02x})", high?, low?),
        Relative => {
            let offset = low? as i8;
            let target = address.wrapping_add(2).wrapping_add(offset as u16);
            format!("{} (${:04x})", offset, target)
        }
    };
    Some(text)
}

/// Decodes the instruction at `address` through `debug_peek`, so nothing
/// ticks and device registers stay untouched. `None` when the opcode byte
/// is unreadable or not part of `set`.
pub fn disassemble(memory: &SharedMemory, address: u16, set: InstructionSet) -> Option<Disassembly> {
    let memory = memory.borrow();
    let opcode = memory.debug_peek(address)?;
    let map = opcode_map(set);
    let info = map.get(&opcode)?;

    let size = info.mode.operand_size();
    let low = (size >= 1)
        .then(|| memory.debug_peek(address.wrapping_add(1)))
        .flatten();
    let high = (size >= 2)
        .then(|| memory.debug_peek(address.wrapping_add(2)))
        .flatten();

    let operand = format_operand(info.mode, address, low, high)?;
    Some(Disassembly {
        mnemonic: info.mnemonic,
        mode: info.mode,
        operand,
        length: 1 + size,
    })
}

/// Logs a trace line per instruction: cycle count, register dump, the raw
/// bytes at PC and their disassembly.
pub struct VerboseDebugger {
    memory: SharedMemory,
    clock: SharedClock,
    known_opcodes: HashMap<u8, &'static OpcodeInfo>,
}

impl VerboseDebugger {
    pub fn new(set: InstructionSet, memory: SharedMemory, clock: SharedClock) -> VerboseDebugger {
        VerboseDebugger {
            memory,
            clock,
            known_opcodes: opcode_map(set),
        }
    }

    fn format_line(&self, regs: &Registers) -> String {
        let mut line = format!(
            "{:016x} | {} | {:04x}: ",
            self.clock.borrow().current_cycle(),
            regs.dump(),
            regs.pc
        );

        let memory = self.memory.borrow();
        let Some(opcode) = memory.debug_peek(regs.pc) else {
            line.push('?');
            return line;
        };

        let mut raw = [String::from("  "), String::from("  "), String::from("  ")];
        raw[0] = format!("{opcode:02x}");

        let assembly = match self.known_opcodes.get(&opcode) {
            None => "?".to_string(),
            Some(info) => {
                let size = info.mode.operand_size();
                let low = (size >= 1)
                    .then(|| memory.debug_peek(regs.pc.wrapping_add(1)))
                    .flatten();
                let high = (size >= 2)
                    .then(|| memory.debug_peek(regs.pc.wrapping_add(2)))
                    .flatten();
                if let Some(byte) = low {
                    raw[1] = format!("{byte:02x}");
                }
                if let Some(byte) = high {
                    raw[2] = format!("{byte:02x}");
                }
                match format_operand(info.mode, regs.pc, low, high) {
                    Some(operand) if operand.is_empty() => info.mnemonic.to_string(),
                    Some(operand) => format!("{} {}", info.mnemonic, operand),
                    None => "?".to_string(),
                }
            }
        };

        line.push_str(&format!("{} {} {} | {}", raw[0], raw[1], raw[2], assembly));
        line
    }
}

impl Debugger for VerboseDebugger {
    fn on_next_instruction(&mut self, regs: &Registers) {
        log::info!("{}", self.format_line(regs));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use emu_core::memory_sparse::SparseMemory;

    use super::*;

    fn memory_with(bytes: &[u8]) -> SharedMemory {
        let mut memory = SparseMemory::new(None);
        memory.write_range(0x0600, bytes);
        Rc::new(RefCell::new(memory))
    }

    #[test]
    fn decodes_simple_instructions() {
        let memory = memory_with(&[0xA9, 0x44, 0x85, 0x10]);
        let lda = disassemble(&memory, 0x0600, InstructionSet::Nmos6502).unwrap();
        assert_eq!(lda.mnemonic, "LDA");
        assert_eq!(lda.operand, "#$44");
        assert_eq!(lda.length, 2);

        let sta = disassemble(&memory, 0x0602, InstructionSet::Nmos6502).unwrap();
        assert_eq!(sta.mnemonic, "STA");
        assert_eq!(sta.operand, "$10");
    }

    #[test]
    fn decodes_indirect_and_relative() {
        let memory = memory_with(&[0x6C, 0xFF, 0x30, 0xF0, 0xFE]);
        let jmp = disassemble(&memory, 0x0600, InstructionSet::Nmos6502).unwrap();
        assert_eq!(jmp.operand, "($30ff)");
        let beq = disassemble(&memory, 0x0603, InstructionSet::Nmos6502).unwrap();
        assert_eq!(beq.mnemonic, "BEQ");
        // -2 branches back onto the branch itself.
        assert_eq!(beq.operand, "-2 ($0603)");
    }

    #[test]
    fn unknown_opcode_is_none() {
        let memory = memory_with(&[0x02]);
        assert!(disassemble(&memory, 0x0600, InstructionSet::Nmos6502).is_none());
        assert!(disassemble(&memory, 0x0600, InstructionSet::Nmos6502Emu).is_some());
    }

    #[test]
    fn unreadable_memory_is_none() {
        let memory = memory_with(&[]);
        assert!(disassemble(&memory, 0x0000, InstructionSet::Nmos6502).is_none());
    }

    /// Every opcode of both sets decodes back to its own mnemonic and mode
    /// with the right length.
    #[test]
    fn disassembly_round_trips_every_opcode() {
        for set in [InstructionSet::Nmos6502, InstructionSet::Nmos6502Emu] {
            for info in crate::instruction_set::instructions(set) {
                let memory = memory_with(&[info.opcode, 0x34, 0x12]);
                let decoded = disassemble(&memory, 0x0600, set).unwrap();
                assert_eq!(decoded.mnemonic, info.mnemonic);
                assert_eq!(decoded.mode, info.mode);
                assert_eq!(decoded.length, 1 + info.mode.operand_size());
            }
        }
    }
}
