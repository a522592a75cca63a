//! Effective-address and operand-fetch primitives.
//!
//! Cycle discipline: every bus access through the mapper costs one cycle,
//! internal address arithmetic costs explicit `internal_tick` calls. The
//! `fast` flag on the indexed modes selects the published-timing variant:
//! fast pays one cycle only when the index crosses a page, slow (stores and
//! read-modify-write) always pays it.

use super::{Cpu, ExecutionError};
use crate::instruction_set::AddressMode;

pub(crate) fn fetch_next_byte(cpu: &mut Cpu) -> Result<u8, ExecutionError> {
    let value = cpu.load(cpu.reg.pc)?;
    cpu.reg.pc = cpu.reg.pc.wrapping_add(1);
    Ok(value)
}

pub(crate) fn absolute_address(cpu: &mut Cpu) -> Result<u16, ExecutionError> {
    let low = fetch_next_byte(cpu)?;
    let high = fetch_next_byte(cpu)?;
    Ok(u16::from_le_bytes([low, high]))
}

/// 8-bit indexing never leaves page zero.
fn wrap_zero_page(base: u8, offset: u8) -> u16 {
    base.wrapping_add(offset) as u16
}

fn page_of(address: u16) -> u16 {
    address & 0xFF00
}

fn absolute_indexed(cpu: &mut Cpu, index: u8, fast: bool) -> Result<u16, ExecutionError> {
    let base = absolute_address(cpu)?;
    let address = base.wrapping_add(index as u16);
    if fast {
        if page_of(base) != page_of(address) {
            cpu.internal_tick();
        }
    } else {
        cpu.internal_tick();
    }
    Ok(address)
}

fn indirect_x_address(cpu: &mut Cpu) -> Result<u16, ExecutionError> {
    let arg = fetch_next_byte(cpu)?;
    let pointer = arg.wrapping_add(cpu.reg.x);
    let low = cpu.load(wrap_zero_page(pointer, 0))?;
    cpu.internal_tick();
    let high = cpu.load(wrap_zero_page(pointer, 1))?;
    Ok(u16::from_le_bytes([low, high]))
}

fn indirect_y_address(cpu: &mut Cpu, fast: bool) -> Result<u16, ExecutionError> {
    let arg = fetch_next_byte(cpu)?;
    let low = cpu.load(arg as u16)?;
    // The high-byte fetch wraps inside page zero too.
    let high = cpu.load(wrap_zero_page(arg, 1))?;
    let base = u16::from_le_bytes([low, high]);
    let address = base.wrapping_add(cpu.reg.y as u16);
    if fast {
        if page_of(base) != page_of(address) {
            cpu.internal_tick();
        }
    } else {
        cpu.internal_tick();
    }
    Ok(address)
}

/// JMP (ptr) dereference. Hardware quirk: the high-byte fetch does not
/// carry into the pointer's high byte, so a pointer at 0xXXFF reads its
/// high byte from 0xXX00.
fn absolute_indirect_address(cpu: &mut Cpu) -> Result<u16, ExecutionError> {
    let pointer = absolute_address(cpu)?;
    let low = cpu.load(pointer)?;
    let high_pointer = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
    let high = cpu.load(high_pointer)?;
    Ok(u16::from_le_bytes([low, high]))
}

/// Effective address for modes that have one.
pub(crate) fn operand_address(
    cpu: &mut Cpu,
    mode: AddressMode,
    fast: bool,
) -> Result<u16, ExecutionError> {
    match mode {
        AddressMode::ZeroPage => Ok(fetch_next_byte(cpu)? as u16),
        AddressMode::ZeroPageX => {
            let base = fetch_next_byte(cpu)?;
            cpu.internal_tick();
            Ok(wrap_zero_page(base, cpu.reg.x))
        }
        AddressMode::ZeroPageY => {
            let base = fetch_next_byte(cpu)?;
            cpu.internal_tick();
            Ok(wrap_zero_page(base, cpu.reg.y))
        }
        AddressMode::Absolute => absolute_address(cpu),
        AddressMode::AbsoluteIndexedX => absolute_indexed(cpu, cpu.reg.x, fast),
        AddressMode::AbsoluteIndexedY => absolute_indexed(cpu, cpu.reg.y, fast),
        AddressMode::IndirectX => indirect_x_address(cpu),
        AddressMode::IndirectY => indirect_y_address(cpu, fast),
        AddressMode::Indirect => absolute_indirect_address(cpu),
        AddressMode::Immediate
        | AddressMode::Implied
        | AddressMode::RegisterA
        | AddressMode::Relative => {
            unreachable!("{mode:?} has no effective address")
        }
    }
}

/// Fetched operand value for read instructions.
pub(crate) fn fetch_operand(
    cpu: &mut Cpu,
    mode: AddressMode,
    fast: bool,
) -> Result<u8, ExecutionError> {
    match mode {
        AddressMode::Immediate => fetch_next_byte(cpu),
        AddressMode::RegisterA => Ok(cpu.reg.a),
        _ => {
            let address = operand_address(cpu, mode, fast)?;
            cpu.load(address)
        }
    }
}

/// A page crossing compares the high byte of the base against the high
/// byte of the target.
pub(crate) fn is_across_page(base: u16, offset: i8) -> bool {
    let target = base.wrapping_add(offset as u16);
    page_of(base) != page_of(target)
}
