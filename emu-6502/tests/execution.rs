//! Whole-system runs: assemble a source program, load the image into RAM
//! behind the mapper, execute until the program halts.

use std::cell::RefCell;
use std::rc::Rc;

use emu_6502::assembler::compile_string;
use emu_6502::cpu::{Cpu, ExecutionError, Registers};
use emu_6502::instruction_set::InstructionSet;
use emu_core::clock::{Clock, SimpleClock};
use emu_core::memory::Memory;
use emu_core::memory_block::MemoryBlock;
use emu_core::memory_mapper::MemoryMapper;

struct RunResult {
    halt_code: Option<u8>,
    regs: Registers,
    cycles: u64,
}

fn run_code(source: &str) -> RunResult {
    let program = compile_string(source, InstructionSet::Nmos6502Emu)
        .unwrap_or_else(|error| panic!("{}\n{}", error.message(), error.source_pointer()));

    let clock = Rc::new(RefCell::new(SimpleClock::new()));
    let ram = Rc::new(RefCell::new(MemoryBlock::ram(None, 0x10000)));
    for (address, byte) in program.sparse_binary_code.iter() {
        ram.borrow_mut()
            .store(address, byte)
            .expect("image fits in ram");
    }

    let mut mapper = MemoryMapper::new(Some(clock.clone()));
    mapper.map_area(0x0000, 0xFFFF, ram).unwrap();

    let mut cpu = Cpu::new(
        clock.clone(),
        Rc::new(RefCell::new(mapper)),
        InstructionSet::Nmos6502Emu,
    );
    cpu.reset();

    match cpu.execute() {
        Err(ExecutionError::Halted { code, regs }) => RunResult {
            halt_code: Some(code),
            regs,
            cycles: clock.borrow().current_cycle(),
        },
        Err(error) => panic!("program faulted: {error}"),
        Ok(()) => unreachable!("execute only returns through an error"),
    }
}

fn fibonacci(n: u64) -> u64 {
    match n {
        0 => 0,
        1 => 1,
        _ => fibonacci(n - 1) + fibonacci(n - 2),
    }
}

#[test]
fn counting_loop_halts_with_the_count() {
    let result = run_code(
        r#"
.isr reset ENTRY
.org 0x2000
ENTRY:
    LDX #$00
LOOP:
    INX
    CPX #$05
    BNE LOOP
    TXA
    HLT A
"#,
    );
    assert_eq!(result.halt_code, Some(0x05));
    assert_eq!(result.regs.x, 0x05);
}

#[test]
fn immediate_halt_code() {
    let result = run_code(
        r#"
.isr reset ENTRY
.org 0x2000
ENTRY:
    HLT #$2A
"#,
    );
    assert_eq!(result.halt_code, Some(0x2A));
}

#[test]
fn store_becomes_visible_in_memory() {
    let result = run_code(
        r#"
.isr reset ENTRY
.org 0x2000
ENTRY:
    LDA #$44
    STA $10
    LDA $10
    HLT A
"#,
    );
    assert_eq!(result.halt_code, Some(0x44));
    assert_eq!(result.regs.a, 0x44);
}

#[test]
fn indirect_jump_honors_the_page_wrap_quirk() {
    let result = run_code(
        r#"
.isr reset ENTRY

.org 0x3000
.byte $40

.org 0x30FF
.byte $80

.org 0x3100
.byte $50

.org 0x2000
ENTRY:
    JMP ($30FF)

.org 0x4080
    HLT #$77

.org 0x5080
    HLT #$EE
"#,
    );
    // The pointer high byte comes from 0x3000, so the target is 0x4080.
    assert_eq!(result.halt_code, Some(0x77));
}

/// The recursive routine keeps intermediate results on the hardware stack,
/// exercising JSR/RTS, PHA/PLA, TSX-relative reads and ADC.
#[test]
fn recursive_fibonacci_through_the_stack() {
    let source_template = r#"
.isr reset TEST_ENTRY
.org 0x2000
TEST_ENTRY:
    LDX COUNT
    JSR FIBONACCI
    STX RESULT_VALUE
    TXA
    HLT A

FIBONACCI_0:
    LDX #$00
    RTS
FIBONACCI_1:
    LDX #$01
    RTS

; input  X
; output X
FIBONACCI:
    CPX #$00
    BEQ FIBONACCI_0
    CPX #$01
    BEQ FIBONACCI_1

    DEX
    TXA
    PHA
    DEX
    JSR FIBONACCI

    PLA
    TAY
    TXA
    PHA
    TYA
    TAX
    JSR FIBONACCI

    TXA
    CLC
    TSX
    INX
    ADC $0100,X
    TAX
    PLA
    RTS

.org 0x3000
COUNT:
.byte {}

RESULT_VALUE:
.byte 0x00
"#;

    for n in [0u64, 1, 2, 5, 8, 11] {
        let source = source_template.replacen("{}", &n.to_string(), 1);
        let result = run_code(&source);
        assert_eq!(
            result.halt_code,
            Some(fibonacci(n) as u8),
            "fibonacci({n})"
        );
    }
}

#[test]
fn fibonacci_of_eight_is_twenty_one() {
    let source = r#"
.isr reset ENTRY
.org 0x2000
ENTRY:
    LDX #$08
    JSR FIB
    TXA
    HLT A
FIB0:
    LDX #$00
    RTS
FIB1:
    LDX #$01
    RTS
FIB:
    CPX #$00
    BEQ FIB0
    CPX #$01
    BEQ FIB1
    DEX
    TXA
    PHA
    DEX
    JSR FIB
    PLA
    TAY
    TXA
    PHA
    TYA
    TAX
    JSR FIB
    TXA
    CLC
    TSX
    INX
    ADC $0100,X
    TAX
    PLA
    RTS
"#;
    let result = run_code(source);
    assert_eq!(result.halt_code, Some(21));
}

/// Every BRK enters the IRQ handler, which counts in X and returns with
/// RTI; eight of them leave X at eight.
#[test]
fn brk_dispatches_through_the_irq_vector() {
    let result = run_code(
        r#"
.isr reset TEST_ENTRY
.isr irq IRQ_HANDLER

.org 0x2000

TEST_ENTRY:
    LDX #$00
    JSR TEST_FUNC
    TXA
    HLT A

TEST_FUNC:
    BRK #$0
    BRK #$0

    BRK #$0
    BRK #$0

    BRK #$0
    BRK #$0

    BRK #$0
    BRK #$0

    RTS

IRQ_HANDLER:
    INX
    RTI
"#,
    );
    assert_eq!(result.halt_code, Some(8));
}

#[test]
fn cycles_accumulate_across_the_run() {
    let result = run_code(
        r#"
.isr reset ENTRY
.org 0x2000
ENTRY:
    NOP
    NOP
    HLT #$00
"#,
    );
    // Reset entry: 3 stack pushes + 2 vector reads. Two NOPs at 2 cycles
    // each, HLT opcode + operand fetch.
    assert_eq!(result.cycles, 5 + 2 + 2 + 2);
    assert_eq!(result.halt_code, Some(0));
}
