use std::collections::HashMap;

/// The rule for computing an instruction's effective operand from its
/// operand bytes and current register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressMode {
    Absolute,         // aaaa
    AbsoluteIndexedX, // aaaa,X
    AbsoluteIndexedY, // aaaa,Y
    Immediate,        // #aa
    Implied,          //
    Indirect,         // (aaaa) - JMP only
    IndirectX,        // (aa,X)
    IndirectY,        // (aa),Y
    RegisterA,        // A
    Relative,         // branch target
    ZeroPage,         // aa
    ZeroPageX,        // aa,X
    ZeroPageY,        // aa,Y
}

impl AddressMode {
    /// Operand byte count. The assembler emits this many bytes after the
    /// opcode and the CPU advances PC by the same amount.
    pub fn operand_size(self) -> u16 {
        use AddressMode::*;
        match self {
            Implied | RegisterA => 0,
            Immediate | Relative | ZeroPage | ZeroPageX | ZeroPageY | IndirectX | IndirectY => 1,
            Absolute | AbsoluteIndexedX | AbsoluteIndexedY | Indirect => 2,
        }
    }
}

impl std::fmt::Display for AddressMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use AddressMode::*;
        let name = match self {
            Absolute => "ABS",
            AbsoluteIndexedX => "ABSX",
            AbsoluteIndexedY => "ABSY",
            Immediate => "Immediate",
            Implied => "Implied",
            Indirect => "ABS_IND",
            IndirectX => "INDX",
            IndirectY => "INDY",
            RegisterA => "ACC",
            Relative => "REL",
            ZeroPage => "ZP",
            ZeroPageX => "ZPX",
            ZeroPageY => "ZPY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub mode: AddressMode,
}

const fn op(opcode: u8, mnemonic: &'static str, mode: AddressMode) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        mnemonic,
        mode,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstructionSet {
    #[default]
    Nmos6502,
    /// NMOS6502 plus the emulator-only HLT opcodes.
    Nmos6502Emu,
}

use AddressMode::*;

/// The 151 documented NMOS opcodes.
#[rustfmt::skip]
pub const NMOS6502_INSTRUCTIONS: &[OpcodeInfo] = &[
    // LDA
    op(0xA9, "LDA", Immediate),
    op(0xA5, "LDA", ZeroPage),
    op(0xB5, "LDA", ZeroPageX),
    op(0xAD, "LDA", Absolute),
    op(0xBD, "LDA", AbsoluteIndexedX),
    op(0xB9, "LDA", AbsoluteIndexedY),
    op(0xA1, "LDA", IndirectX),
    op(0xB1, "LDA", IndirectY),
    // LDX
    op(0xA2, "LDX", Immediate),
    op(0xA6, "LDX", ZeroPage),
    op(0xB6, "LDX", ZeroPageY),
    op(0xAE, "LDX", Absolute),
    op(0xBE, "LDX", AbsoluteIndexedY),
    // LDY
    op(0xA0, "LDY", Immediate),
    op(0xA4, "LDY", ZeroPage),
    op(0xB4, "LDY", ZeroPageX),
    op(0xAC, "LDY", Absolute),
    op(0xBC, "LDY", AbsoluteIndexedX),
    // STA
    op(0x85, "STA", ZeroPage),
    op(0x95, "STA", ZeroPageX),
    op(0x8D, "STA", Absolute),
    op(0x9D, "STA", AbsoluteIndexedX),
    op(0x99, "STA", AbsoluteIndexedY),
    op(0x81, "STA", IndirectX),
    op(0x91, "STA", IndirectY),
    // STX
    op(0x86, "STX", ZeroPage),
    op(0x96, "STX", ZeroPageY),
    op(0x8E, "STX", Absolute),
    // STY
    op(0x84, "STY", ZeroPage),
    op(0x94, "STY", ZeroPageX),
    op(0x8C, "STY", Absolute),
    // Transfers
    op(0xAA, "TAX", Implied),
    op(0xA8, "TAY", Implied),
    op(0x8A, "TXA", Implied),
    op(0x98, "TYA", Implied),
    op(0xBA, "TSX", Implied),
    op(0x9A, "TXS", Implied),
    // Stack
    op(0x48, "PHA", Implied),
    op(0x08, "PHP", Implied),
    op(0x68, "PLA", Implied),
    op(0x28, "PLP", Implied),
    // AND
    op(0x29, "AND", Immediate),
    op(0x25, "AND", ZeroPage),
    op(0x35, "AND", ZeroPageX),
    op(0x2D, "AND", Absolute),
    op(0x3D, "AND", AbsoluteIndexedX),
    op(0x39, "AND", AbsoluteIndexedY),
    op(0x21, "AND", IndirectX),
    op(0x31, "AND", IndirectY),
    // ORA
    op(0x09, "ORA", Immediate),
    op(0x05, "ORA", ZeroPage),
    op(0x15, "ORA", ZeroPageX),
    op(0x0D, "ORA", Absolute),
    op(0x1D, "ORA", AbsoluteIndexedX),
    op(0x19, "ORA", AbsoluteIndexedY),
    op(0x01, "ORA", IndirectX),
    op(0x11, "ORA", IndirectY),
    // EOR
    op(0x49, "EOR", Immediate),
    op(0x45, "EOR", ZeroPage),
    op(0x55, "EOR", ZeroPageX),
    op(0x4D, "EOR", Absolute),
    op(0x5D, "EOR", AbsoluteIndexedX),
    op(0x59, "EOR", AbsoluteIndexedY),
    op(0x41, "EOR", IndirectX),
    op(0x51, "EOR", IndirectY),
    // BIT
    op(0x24, "BIT", ZeroPage),
    op(0x2C, "BIT", Absolute),
    // ADC
    op(0x69, "ADC", Immediate),
    op(0x65, "ADC", ZeroPage),
    op(0x75, "ADC", ZeroPageX),
    op(0x6D, "ADC", Absolute),
    op(0x7D, "ADC", AbsoluteIndexedX),
    op(0x79, "ADC", AbsoluteIndexedY),
    op(0x61, "ADC", IndirectX),
    op(0x71, "ADC", IndirectY),
    // SBC
    op(0xE9, "SBC", Immediate),
    op(0xE5, "SBC", ZeroPage),
    op(0xF5, "SBC", ZeroPageX),
    op(0xED, "SBC", Absolute),
    op(0xFD, "SBC", AbsoluteIndexedX),
    op(0xF9, "SBC", AbsoluteIndexedY),
    op(0xE1, "SBC", IndirectX),
    op(0xF1, "SBC", IndirectY),
    // CMP
    op(0xC9, "CMP", Immediate),
    op(0xC5, "CMP", ZeroPage),
    op(0xD5, "CMP", ZeroPageX),
    op(0xCD, "CMP", Absolute),
    op(0xDD, "CMP", AbsoluteIndexedX),
    op(0xD9, "CMP", AbsoluteIndexedY),
    op(0xC1, "CMP", IndirectX),
    op(0xD1, "CMP", IndirectY),
    // CPX
    op(0xE0, "CPX", Immediate),
    op(0xE4, "CPX", ZeroPage),
    op(0xEC, "CPX", Absolute),
    // CPY
    op(0xC0, "CPY", Immediate),
    op(0xC4, "CPY", ZeroPage),
    op(0xCC, "CPY", Absolute),
    // INC / DEC on memory
    op(0xE6, "INC", ZeroPage),
    op(0xF6, "INC", ZeroPageX),
    op(0xEE, "INC", Absolute),
    op(0xFE, "INC", AbsoluteIndexedX),
    op(0xC6, "DEC", ZeroPage),
    op(0xD6, "DEC", ZeroPageX),
    op(0xCE, "DEC", Absolute),
    op(0xDE, "DEC", AbsoluteIndexedX),
    // INC / DEC on registers
    op(0xE8, "INX", Implied),
    op(0xC8, "INY", Implied),
    op(0xCA, "DEX", Implied),
    op(0x88, "DEY", Implied),
    // ASL
    op(0x0A, "ASL", RegisterA),
    op(0x06, "ASL", ZeroPage),
    op(0x16, "ASL", ZeroPageX),
    op(0x0E, "ASL", Absolute),
    op(0x1E, "ASL", AbsoluteIndexedX),
    // LSR
    op(0x4A, "LSR", RegisterA),
    op(0x46, "LSR", ZeroPage),
    op(0x56, "LSR", ZeroPageX),
    op(0x4E, "LSR", Absolute),
    op(0x5E, "LSR", AbsoluteIndexedX),
    // ROL
    op(0x2A, "ROL", RegisterA),
    op(0x26, "ROL", ZeroPage),
    op(0x36, "ROL", ZeroPageX),
    op(0x2E, "ROL", Absolute),
    op(0x3E, "ROL", AbsoluteIndexedX),
    // ROR
    op(0x6A, "ROR", RegisterA),
    op(0x66, "ROR", ZeroPage),
    op(0x76, "ROR", ZeroPageX),
    op(0x6E, "ROR", Absolute),
    op(0x7E, "ROR", AbsoluteIndexedX),
    // Jumps and subroutines
    op(0x4C, "JMP", Absolute),
    op(0x6C, "JMP", Indirect),
    op(0x20, "JSR", Absolute),
    op(0x60, "RTS", Implied),
    // Branches
    op(0x90, "BCC", Relative),
    op(0xB0, "BCS", Relative),
    op(0xF0, "BEQ", Relative),
    op(0xD0, "BNE", Relative),
    op(0x30, "BMI", Relative),
    op(0x10, "BPL", Relative),
    op(0x50, "BVC", Relative),
    op(0x70, "BVS", Relative),
    // Flag operations
    op(0x18, "CLC", Implied),
    op(0x38, "SEC", Implied),
    op(0xD8, "CLD", Implied),
    op(0xF8, "SED", Implied),
    op(0x58, "CLI", Implied),
    op(0x78, "SEI", Implied),
    op(0xB8, "CLV", Implied),
    // Interrupts and misc
    op(0x00, "BRK", Immediate),
    op(0x40, "RTI", Implied),
    op(0xEA, "NOP", Implied),
];

/// Emulator-only extensions: HLT terminates execution with an 8-bit exit
/// code, taken from A (`HLT A`) or from the operand byte (`HLT #$xx`).
/// Both opcodes sit in KIL slots and trap as invalid under the plain set.
pub const NMOS6502_EMU_EXTENSIONS: &[OpcodeInfo] = &[
    op(0x02, "HLT", RegisterA),
    op(0x12, "HLT", Immediate),
];

/// All opcode records of `set`, extensions included.
pub fn instructions(set: InstructionSet) -> impl Iterator<Item = &'static OpcodeInfo> {
    let extensions = match set {
        InstructionSet::Nmos6502 => &[][..],
        InstructionSet::Nmos6502Emu => NMOS6502_EMU_EXTENSIONS,
    };
    NMOS6502_INSTRUCTIONS.iter().chain(extensions.iter())
}

/// opcode -> record lookup.
pub fn opcode_map(set: InstructionSet) -> HashMap<u8, &'static OpcodeInfo> {
    instructions(set).map(|info| (info.opcode, info)).collect()
}

/// mnemonic -> (mode -> record) lookup, keyed by uppercase mnemonic.
pub fn mnemonic_map(
    set: InstructionSet,
) -> HashMap<&'static str, HashMap<AddressMode, &'static OpcodeInfo>> {
    let mut map: HashMap<&'static str, HashMap<AddressMode, &'static OpcodeInfo>> = HashMap::new();
    for info in instructions(set) {
        map.entry(info.mnemonic).or_default().insert(info.mode, info);
    }
    map
}
