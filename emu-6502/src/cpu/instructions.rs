//! Operation kernels and the opcode-indexed handler table.
//!
//! Each table entry pairs a kernel with the address mode of that opcode;
//! kernels pull operands through the addressing primitives, so cycle counts
//! fall out of the access pattern rather than a lookup table.

use std::sync::OnceLock;

use super::addressing::{
    absolute_address, fetch_next_byte, fetch_operand, is_across_page, operand_address,
};
use super::registers::Flag;
use super::{Cpu, ExecutionError, Interrupt};
use crate::instruction_set::{instructions, AddressMode, InstructionSet};

pub(crate) type Operation = fn(&mut Cpu, AddressMode) -> Result<(), ExecutionError>;

#[derive(Clone, Copy)]
pub(crate) struct HandlerEntry {
    pub operation: Operation,
    pub mode: AddressMode,
}

pub(crate) type HandlerTable = [Option<HandlerEntry>; 256];

/// The table for `set`, built once from the instruction-set records.
pub(crate) fn handler_table(set: InstructionSet) -> &'static HandlerTable {
    static NMOS6502: OnceLock<HandlerTable> = OnceLock::new();
    static NMOS6502_EMU: OnceLock<HandlerTable> = OnceLock::new();
    match set {
        InstructionSet::Nmos6502 => NMOS6502.get_or_init(|| build_handler_table(set)),
        InstructionSet::Nmos6502Emu => NMOS6502_EMU.get_or_init(|| build_handler_table(set)),
    }
}

fn build_handler_table(set: InstructionSet) -> HandlerTable {
    let mut table: HandlerTable = [None; 256];
    for info in instructions(set) {
        table[info.opcode as usize] = Some(HandlerEntry {
            operation: operation_for(info.mnemonic),
            mode: info.mode,
        });
    }
    table
}

fn operation_for(mnemonic: &str) -> Operation {
    match mnemonic {
        "LDA" => lda,
        "LDX" => ldx,
        "LDY" => ldy,
        "STA" => sta,
        "STX" => stx,
        "STY" => sty,
        "TAX" => tax,
        "TAY" => tay,
        "TXA" => txa,
        "TYA" => tya,
        "TSX" => tsx,
        "TXS" => txs,
        "PHA" => pha,
        "PHP" => php,
        "PLA" => pla,
        "PLP" => plp,
        "AND" => and,
        "ORA" => ora,
        "EOR" => eor,
        "BIT" => bit,
        "ADC" => adc,
        "SBC" => sbc,
        "CMP" => cmp,
        "CPX" => cpx,
        "CPY" => cpy,
        "INC" => inc,
        "DEC" => dec,
        "INX" => inx,
        "INY" => iny,
        "DEX" => dex,
        "DEY" => dey,
        "ASL" => asl,
        "LSR" => lsr,
        "ROL" => rol,
        "ROR" => ror,
        "JMP" => jmp,
        "JSR" => jsr,
        "RTS" => rts,
        "RTI" => rti,
        "BRK" => brk,
        "BCC" => bcc,
        "BCS" => bcs,
        "BEQ" => beq,
        "BNE" => bne,
        "BMI" => bmi,
        "BPL" => bpl,
        "BVC" => bvc,
        "BVS" => bvs,
        "CLC" => clc,
        "SEC" => sec,
        "CLD" => cld,
        "SED" => sed,
        "CLI" => cli,
        "SEI" => sei,
        "CLV" => clv,
        "NOP" => nop,
        "HLT" => hlt,
        _ => unreachable!("no operation kernel for mnemonic {mnemonic}"),
    }
}

//-----------------------------------------------------------------------------
// Loads and stores

fn lda(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let value = fetch_operand(cpu, mode, true)?;
    cpu.reg.a = value;
    cpu.reg.set_negative_zero(value);
    Ok(())
}

fn ldx(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let value = fetch_operand(cpu, mode, true)?;
    cpu.reg.x = value;
    cpu.reg.set_negative_zero(value);
    Ok(())
}

fn ldy(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let value = fetch_operand(cpu, mode, true)?;
    cpu.reg.y = value;
    cpu.reg.set_negative_zero(value);
    Ok(())
}

// Stores always pay the indexing cycle; no flags change.

fn sta(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let address = operand_address(cpu, mode, false)?;
    cpu.store(address, cpu.reg.a)
}

fn stx(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let address = operand_address(cpu, mode, false)?;
    cpu.store(address, cpu.reg.x)
}

fn sty(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let address = operand_address(cpu, mode, false)?;
    cpu.store(address, cpu.reg.y)
}

//-----------------------------------------------------------------------------
// Register transfers

fn transfer(cpu: &mut Cpu, value: u8, set_flags: bool) -> u8 {
    if set_flags {
        cpu.reg.set_negative_zero(value);
    }
    cpu.internal_tick();
    value
}

fn tax(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.x = transfer(cpu, cpu.reg.a, true);
    Ok(())
}

fn tay(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.y = transfer(cpu, cpu.reg.a, true);
    Ok(())
}

fn txa(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.a = transfer(cpu, cpu.reg.x, true);
    Ok(())
}

fn tya(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.a = transfer(cpu, cpu.reg.y, true);
    Ok(())
}

fn tsx(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.x = transfer(cpu, cpu.reg.stack_pointer, true);
    Ok(())
}

// TXS is the one transfer that leaves the flags alone.
fn txs(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.stack_pointer = transfer(cpu, cpu.reg.x, false);
    Ok(())
}

//-----------------------------------------------------------------------------
// Increments and decrements

fn register_step(cpu: &mut Cpu, value: u8, direction: i8) -> u8 {
    let result = if direction > 0 {
        value.wrapping_add(1)
    } else {
        value.wrapping_sub(1)
    };
    cpu.reg.set_negative_zero(result);
    cpu.internal_tick();
    result
}

fn inx(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.x = register_step(cpu, cpu.reg.x, 1);
    Ok(())
}

fn iny(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.y = register_step(cpu, cpu.reg.y, 1);
    Ok(())
}

fn dex(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.x = register_step(cpu, cpu.reg.x, -1);
    Ok(())
}

fn dey(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.reg.y = register_step(cpu, cpu.reg.y, -1);
    Ok(())
}

fn memory_step(cpu: &mut Cpu, mode: AddressMode, direction: i8) -> Result<(), ExecutionError> {
    let address = operand_address(cpu, mode, false)?;
    let value = cpu.load(address)?;
    let result = if direction > 0 {
        value.wrapping_add(1)
    } else {
        value.wrapping_sub(1)
    };
    cpu.reg.set_negative_zero(result);
    cpu.internal_tick();
    cpu.store(address, result)
}

fn inc(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    memory_step(cpu, mode, 1)
}

fn dec(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    memory_step(cpu, mode, -1)
}

//-----------------------------------------------------------------------------
// Logic

fn logical(
    cpu: &mut Cpu,
    mode: AddressMode,
    op: fn(u8, u8) -> u8,
) -> Result<(), ExecutionError> {
    let operand = fetch_operand(cpu, mode, true)?;
    let result = op(cpu.reg.a, operand);
    cpu.reg.set_negative_zero(result);
    cpu.reg.a = result;
    Ok(())
}

fn and(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    logical(cpu, mode, |a, b| a & b)
}

fn ora(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    logical(cpu, mode, |a, b| a | b)
}

fn eor(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    logical(cpu, mode, |a, b| a ^ b)
}

/// A stays untouched: Z from A & operand, N and V copied from the operand.
fn bit(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let operand = fetch_operand(cpu, mode, true)?;
    cpu.reg.set_flag(Flag::Zero, cpu.reg.a & operand == 0);
    cpu.reg.set_flag(Flag::Negative, operand & 0x80 != 0);
    cpu.reg.set_flag(Flag::Overflow, operand & 0x40 != 0);
    Ok(())
}

//-----------------------------------------------------------------------------
// Arithmetic

/// ADC, and SBC as ADC of the inverted operand. Decimal mode is not
/// modeled; silently producing binary results would be worse than failing.
fn arithmetic(cpu: &mut Cpu, mode: AddressMode, subtract: bool) -> Result<(), ExecutionError> {
    let mut operand = fetch_operand(cpu, mode, true)?;
    if cpu.reg.test_flag(Flag::Decimal) {
        return Err(ExecutionError::UnsupportedOperation { regs: cpu.reg });
    }

    let mut result = cpu.reg.a as u16;
    if subtract {
        result = result
            .wrapping_sub(operand as u16)
            .wrapping_sub(1 - cpu.reg.carry_value() as u16);
        operand = !operand;
    } else {
        result = result + operand as u16 + cpu.reg.carry_value() as u16;
    }

    // Signed overflow: both inputs share a sign and the result does not.
    let overflow =
        (cpu.reg.a ^ operand) & 0x80 == 0 && ((result as u8) ^ operand) & 0x80 != 0;

    cpu.reg.a = result as u8;
    cpu.reg.set_negative_zero(cpu.reg.a);
    cpu.reg.set_flag(Flag::Carry, subtract != (result > 0xFF));
    cpu.reg.set_flag(Flag::Overflow, overflow);
    Ok(())
}

fn adc(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    arithmetic(cpu, mode, false)
}

fn sbc(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    arithmetic(cpu, mode, true)
}

fn compare(cpu: &mut Cpu, mode: AddressMode, register: u8) -> Result<(), ExecutionError> {
    let operand = fetch_operand(cpu, mode, true)?;
    cpu.reg.set_negative_zero(register.wrapping_sub(operand));
    cpu.reg.set_flag(Flag::Carry, register >= operand);
    Ok(())
}

fn cmp(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    compare(cpu, mode, cpu.reg.a)
}

fn cpx(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    compare(cpu, mode, cpu.reg.x)
}

fn cpy(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    compare(cpu, mode, cpu.reg.y)
}

//-----------------------------------------------------------------------------
// Shifts and rotates

type ShiftOp = fn(u8, bool) -> (u8, bool);

fn shift_asl(value: u8, _carry: bool) -> (u8, bool) {
    (value << 1, value & 0x80 != 0)
}

fn shift_lsr(value: u8, _carry: bool) -> (u8, bool) {
    (value >> 1, value & 0x01 != 0)
}

fn shift_rol(value: u8, carry: bool) -> (u8, bool) {
    ((value << 1) | carry as u8, value & 0x80 != 0)
}

fn shift_ror(value: u8, carry: bool) -> (u8, bool) {
    ((value >> 1) | ((carry as u8) << 7), value & 0x01 != 0)
}

fn shift(cpu: &mut Cpu, mode: AddressMode, op: ShiftOp) -> Result<(), ExecutionError> {
    if mode == AddressMode::RegisterA {
        let operand = cpu.reg.a;
        cpu.internal_tick();
        let (result, carry) = op(operand, cpu.reg.test_flag(Flag::Carry));
        cpu.reg.set_negative_zero(result);
        cpu.reg.set_flag(Flag::Carry, carry);
        cpu.reg.a = result;
        Ok(())
    } else {
        let address = operand_address(cpu, mode, false)?;
        let operand = cpu.load(address)?;
        cpu.internal_tick();
        let (result, carry) = op(operand, cpu.reg.test_flag(Flag::Carry));
        cpu.reg.set_negative_zero(result);
        cpu.reg.set_flag(Flag::Carry, carry);
        cpu.store(address, result)
    }
}

fn asl(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    shift(cpu, mode, shift_asl)
}

fn lsr(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    shift(cpu, mode, shift_lsr)
}

fn rol(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    shift(cpu, mode, shift_rol)
}

fn ror(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    shift(cpu, mode, shift_ror)
}

//-----------------------------------------------------------------------------
// Flag operations

fn flag_op(cpu: &mut Cpu, flag: Flag, state: bool) -> Result<(), ExecutionError> {
    cpu.internal_tick();
    cpu.reg.set_flag(flag, state);
    Ok(())
}

fn clc(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::Carry, false)
}

fn sec(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::Carry, true)
}

fn cld(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::Decimal, false)
}

fn sed(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::Decimal, true)
}

fn cli(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::InterruptDisable, false)
}

fn sei(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::InterruptDisable, true)
}

fn clv(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    flag_op(cpu, Flag::Overflow, false)
}

//-----------------------------------------------------------------------------
// Stack

fn stack_push_byte(cpu: &mut Cpu, value: u8, reuse_cycle: bool) -> Result<(), ExecutionError> {
    cpu.store(cpu.reg.stack_pointer_memory_address(), value)?;
    if !reuse_cycle {
        cpu.internal_tick();
    }
    cpu.reg.stack_pointer = cpu.reg.stack_pointer.wrapping_sub(1);
    Ok(())
}

fn stack_pull_byte(cpu: &mut Cpu, reuse_cycle: bool) -> Result<u8, ExecutionError> {
    cpu.reg.stack_pointer = cpu.reg.stack_pointer.wrapping_add(1);
    let value = cpu.load(cpu.reg.stack_pointer_memory_address())?;
    if !reuse_cycle {
        cpu.internal_tick();
    }
    Ok(value)
}

fn pha(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    stack_push_byte(cpu, cpu.reg.a, false)
}

// The stacked copy of P always has B and Unused set.
fn php(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    let value = cpu.reg.flags | Flag::Break as u8 | Flag::Unused as u8;
    stack_push_byte(cpu, value, false)
}

fn pla(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    let value = stack_pull_byte(cpu, false)?;
    cpu.internal_tick();
    cpu.reg.set_negative_zero(value);
    cpu.reg.a = value;
    Ok(())
}

fn pull_flags(cpu: &mut Cpu, reuse_cycle: bool) -> Result<(), ExecutionError> {
    let value = stack_pull_byte(cpu, false)?;
    cpu.reg.flags = value;
    // B and Unused have no storage in the register itself.
    cpu.reg.set_flag(Flag::Break, false);
    cpu.reg.set_flag(Flag::Unused, false);
    if !reuse_cycle {
        cpu.internal_tick();
    }
    Ok(())
}

fn plp(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    pull_flags(cpu, false)
}

//-----------------------------------------------------------------------------
// Branches, jumps, subroutines

fn branch(cpu: &mut Cpu, flag: Flag, state: bool) -> Result<(), ExecutionError> {
    let offset = fetch_next_byte(cpu)? as i8;
    if cpu.reg.test_flag(flag) == state {
        cpu.internal_tick();
        // The page test runs against the instruction after the branch.
        if is_across_page(cpu.reg.pc, offset) {
            cpu.internal_tick();
        }
        cpu.reg.pc = cpu.reg.pc.wrapping_add(offset as u16);
    }
    Ok(())
}

fn bcc(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Carry, false)
}

fn bcs(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Carry, true)
}

fn beq(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Zero, true)
}

fn bne(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Zero, false)
}

fn bmi(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Negative, true)
}

fn bpl(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Negative, false)
}

fn bvc(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Overflow, false)
}

fn bvs(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    branch(cpu, Flag::Overflow, true)
}

fn jmp(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let address = match mode {
        AddressMode::Absolute => absolute_address(cpu)?,
        AddressMode::Indirect => operand_address(cpu, mode, false)?,
        _ => unreachable!("JMP has no {mode:?} variant"),
    };
    cpu.reg.pc = address;
    Ok(())
}

fn jsr(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    let address = absolute_address(cpu)?;
    // The return address on the stack points one byte before the
    // continuation; RTS compensates.
    cpu.reg.pc = cpu.reg.pc.wrapping_sub(1);
    stack_push_byte(cpu, (cpu.reg.pc >> 8) as u8, false)?;
    stack_push_byte(cpu, (cpu.reg.pc & 0xFF) as u8, true)?;
    cpu.reg.pc = address;
    Ok(())
}

fn return_from_stack(
    cpu: &mut Cpu,
    increment_pc: bool,
    reuse_cycle: bool,
) -> Result<(), ExecutionError> {
    let low = stack_pull_byte(cpu, reuse_cycle)?;
    let high = stack_pull_byte(cpu, reuse_cycle)?;
    cpu.internal_tick();
    cpu.reg.pc = u16::from_le_bytes([low, high]);
    if increment_pc {
        cpu.reg.pc = cpu.reg.pc.wrapping_add(1);
    }
    Ok(())
}

fn rts(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    return_from_stack(cpu, true, false)
}

fn rti(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    pull_flags(cpu, true)?;
    return_from_stack(cpu, false, true)
}

//-----------------------------------------------------------------------------
// Interrupts, halt, misc

/// BRK advances PC over a padding byte and latches the interrupt; the
/// service sequence runs at the top of the next loop iteration.
fn brk(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    let _padding = fetch_next_byte(cpu)?;
    cpu.set_pending_interrupt(Interrupt::Brk);
    Ok(())
}

pub(crate) fn handle_interrupt(cpu: &mut Cpu, interrupt: Interrupt) -> Result<(), ExecutionError> {
    stack_push_byte(cpu, (cpu.reg.pc >> 8) as u8, true)?;
    stack_push_byte(cpu, (cpu.reg.pc & 0xFF) as u8, true)?;

    let mut stacked_flags = cpu.reg.flags | Flag::Unused as u8;
    if interrupt == Interrupt::Brk {
        stacked_flags |= Flag::Break as u8;
    }
    stack_push_byte(cpu, stacked_flags, true)?;

    cpu.reg.set_flag(Flag::InterruptDisable, true);
    // The vector is read through the ordinary fetch path.
    cpu.reg.pc = interrupt.vector_address();
    cpu.reg.pc = absolute_address(cpu)?;
    Ok(())
}

fn nop(cpu: &mut Cpu, _: AddressMode) -> Result<(), ExecutionError> {
    cpu.internal_tick();
    Ok(())
}

/// Emulator-only controlled termination: the operand becomes the process
/// exit code of the runner.
fn hlt(cpu: &mut Cpu, mode: AddressMode) -> Result<(), ExecutionError> {
    let code = fetch_operand(cpu, mode, true)?;
    Err(ExecutionError::Halted {
        code,
        regs: cpu.reg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction_set::opcode_map;

    #[test]
    fn every_instruction_has_a_handler() {
        for set in [InstructionSet::Nmos6502, InstructionSet::Nmos6502Emu] {
            let table = handler_table(set);
            for (opcode, info) in opcode_map(set) {
                let entry = table[opcode as usize]
                    .unwrap_or_else(|| panic!("missing handler for {:02x}", opcode));
                assert_eq!(entry.mode, info.mode, "mode mismatch for {:02x}", opcode);
            }
        }
    }

    #[test]
    fn unassigned_slots_stay_empty() {
        let table = handler_table(InstructionSet::Nmos6502);
        // 0x02 is a KIL slot in the plain set.
        assert!(table[0x02].is_none());
        assert!(table[0xFF].is_none());
        let emu = handler_table(InstructionSet::Nmos6502Emu);
        assert!(emu[0x02].is_some());
        assert!(emu[0x12].is_some());
    }

    #[test]
    fn shift_kernels() {
        assert_eq!(shift_asl(0b1000_0001, false), (0b0000_0010, true));
        assert_eq!(shift_lsr(0b1000_0001, false), (0b0100_0000, true));
        assert_eq!(shift_rol(0b1000_0000, true), (0b0000_0001, true));
        assert_eq!(shift_ror(0b0000_0001, true), (0b1000_0000, true));
    }
}
