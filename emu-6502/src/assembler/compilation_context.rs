use std::collections::{BTreeSet, HashMap};

use emu_core::bytes::{parse_packed_integral, parse_word, relative_jump_offset};
use emu_core::program::{
    Program, ProgramError, RelocationInfo, RelocationMode, SymbolInfo, ValueAlias,
};
use log::debug;

use super::compilation_error::{CompilationError, CompilationErrorKind};
use super::instruction_argument::{
    filter_modes_by_size, parse_instruction_argument, ArgumentValue,
};
use super::tokenizer::{LineTokenizer, Token};
use crate::instruction_set::{AddressMode, OpcodeInfo};
use crate::vectors::{IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};

type Variants = HashMap<AddressMode, &'static OpcodeInfo>;

/// Per-compilation state: the output program and the emission cursor.
pub(super) struct CompilationContext<'a> {
    program: &'a mut Program,
    current_position: u16,
}

fn error_at(kind: CompilationErrorKind, token: &Token) -> CompilationError {
    CompilationError::new(kind, token.value.clone(), Some(token.location.clone()))
}

impl<'a> CompilationContext<'a> {
    pub fn new(program: &'a mut Program) -> CompilationContext<'a> {
        CompilationContext {
            program,
            current_position: 0,
        }
    }

    //-------------------------------------------------------------------------
    // Labels and aliases

    /// `NAME:` binds NAME at the current position. A forward reference may
    /// already have created the symbol as imported; definition completes it.
    pub fn begin_symbol(&mut self, name_token: &Token) -> Result<(), CompilationError> {
        let name = name_token.value.trim_end_matches(':');
        if !is_valid_name(name) {
            return Err(error_at(CompilationErrorKind::InvalidToken, name_token));
        }

        match self.program.find_symbol_mut(name) {
            Some(symbol) => {
                if symbol.offset.is_some() {
                    return Err(error_at(
                        CompilationErrorKind::SymbolRedefinition,
                        name_token,
                    ));
                }
                debug!("Found symbol '{}' at {:04x}", name, self.current_position);
                symbol.offset = Some(self.current_position);
                symbol.imported = false;
            }
            None => {
                debug!("Adding symbol '{}' at {:04x}", name, self.current_position);
                self.program
                    .add_symbol(SymbolInfo {
                        name: name.to_string(),
                        offset: Some(self.current_position),
                        imported: false,
                    })
                    .map_err(|_| {
                        error_at(CompilationErrorKind::SymbolRedefinition, name_token)
                    })?;
            }
        }
        Ok(())
    }

    /// `NAME = VALUE` / `NAME equ VALUE`. The width comes from the literal.
    pub fn add_alias_definition(
        &mut self,
        name_token: &Token,
        value_token: &Token,
    ) -> Result<(), CompilationError> {
        if !is_valid_name(&name_token.value) {
            return Err(error_at(CompilationErrorKind::InvalidToken, name_token));
        }
        let value = parse_packed_integral(&value_token.value, None)
            .map_err(|_| error_at(CompilationErrorKind::InvalidToken, value_token))?;
        if value.len() > 2 {
            return Err(error_at(CompilationErrorKind::InvalidToken, value_token));
        }

        debug!("Adding alias '{}' = {:02x?}", name_token.value, value);
        self.program
            .add_alias(ValueAlias {
                name: name_token.value.clone(),
                value,
            })
            .map_err(|_| error_at(CompilationErrorKind::AliasRedefinition, name_token))
    }

    //-------------------------------------------------------------------------
    // Directives

    pub fn handle_command(
        &mut self,
        command_token: &Token,
        line: &mut LineTokenizer,
    ) -> Result<(), CompilationError> {
        let command = command_token.value.trim_start_matches('.');
        match command {
            "org" => self.parse_org_command(line),
            "align" => self.parse_align_command(line),
            "byte" | "byt" => self.parse_data_command(line, 1),
            "word" | "addr" | "dbyt" => self.parse_data_command(line, 2),
            "dword" => self.parse_data_command(line, 4),
            "text" => self.parse_text_command(line, false),
            "asciiz" => self.parse_text_command(line, true),
            "isr" => self.parse_isr_command(line),
            _ => Err(error_at(
                CompilationErrorKind::UnknownCommand,
                command_token,
            )),
        }
    }

    fn parse_org_command(&mut self, line: &mut LineTokenizer) -> Result<(), CompilationError> {
        let token = line.expect_token()?;
        let new_position = if let Some(alias) = self.program.find_alias(&token.value) {
            alias_word(alias)
        } else if is_literal_text(&token.value) {
            parse_word(&token.value)
                .map_err(|_| error_at(CompilationErrorKind::InvalidCommandArgument, &token))?
        } else {
            return Err(error_at(CompilationErrorKind::SymbolIsNotAllowed, &token));
        };

        debug!(
            "Setting position {:04x} -> {:04x}",
            self.current_position, new_position
        );
        self.current_position = new_position;
        Ok(())
    }

    fn parse_align_command(&mut self, line: &mut LineTokenizer) -> Result<(), CompilationError> {
        let token = line.expect_token()?;
        let alignment: u16 = if token.is("page") {
            0x0100
        } else {
            parse_word(&token.value)
                .map_err(|_| error_at(CompilationErrorKind::InvalidCommandArgument, &token))?
        };

        if alignment.count_ones() != 1 {
            return Err(error_at(
                CompilationErrorKind::InvalidCommandArgument,
                &token,
            )
            .with_detail("alignment must be a power of two"));
        }

        let mask = alignment - 1;
        let mut new_position = self.current_position;
        if new_position & mask != 0 {
            new_position = (new_position & !mask).wrapping_add(alignment);
        }
        debug!(
            "Setting position {:04x} -> {:04x}",
            self.current_position, new_position
        );
        self.current_position = new_position;
        Ok(())
    }

    /// `.byte/.word/.dbyt/.dword`: little-endian elements of a fixed
    /// width. Symbols are only representable at the two-byte width, where
    /// they become Absolute relocations over zero placeholders.
    fn parse_data_command(
        &mut self,
        line: &mut LineTokenizer,
        element_size: usize,
    ) -> Result<(), CompilationError> {
        for token in line.token_list(",")? {
            if token.value.starts_with('"') {
                let bytes = quoted_bytes(&token, false)?;
                if bytes.len() != element_size {
                    return Err(error_at(CompilationErrorKind::InvalidOperandSize, &token));
                }
                self.emit_bytes(&token, &bytes)?;
            } else if let Some(alias) = self.program.find_alias(&token.value) {
                if alias.value.len() != element_size {
                    return Err(error_at(CompilationErrorKind::InvalidOperandSize, &token));
                }
                let bytes = alias.value.clone();
                self.emit_bytes(&token, &bytes)?;
            } else if is_literal_text(&token.value) {
                let bytes = parse_packed_integral(&token.value, Some(element_size))
                    .map_err(|_| error_at(CompilationErrorKind::InvalidToken, &token))?;
                self.emit_bytes(&token, &bytes)?;
            } else if is_valid_name(&token.value) {
                if element_size != 2 {
                    return Err(error_at(CompilationErrorKind::InvalidOperandSize, &token)
                        .with_detail("symbol references need a two-byte element"));
                }
                self.put_symbol_reference(
                    RelocationMode::Absolute,
                    &token.value,
                    self.current_position,
                );
                self.emit_bytes(&token, &[0, 0])?;
            } else {
                return Err(error_at(CompilationErrorKind::InvalidToken, &token));
            }
        }
        Ok(())
    }

    fn parse_text_command(
        &mut self,
        line: &mut LineTokenizer,
        trailing_zero: bool,
    ) -> Result<(), CompilationError> {
        let token = line.expect_token()?;
        if !token.value.starts_with('"') {
            return Err(error_at(CompilationErrorKind::InvalidToken, &token));
        }
        let bytes = quoted_bytes(&token, trailing_zero)?;
        self.emit_bytes(&token, &bytes)
    }

    /// `.isr {reset|irq|nmib} SYMBOL` places a two-byte reference at the
    /// hardware vector.
    fn parse_isr_command(&mut self, line: &mut LineTokenizer) -> Result<(), CompilationError> {
        let isr_token = line.expect_token()?;
        let vector = match isr_token.value.as_str() {
            "reset" => RESET_VECTOR,
            "irq" => IRQ_VECTOR,
            "nmib" => NMI_VECTOR,
            _ => return Err(error_at(CompilationErrorKind::UnknownIsr, &isr_token)),
        };

        let target = line.expect_token()?;
        debug!("Setting isr {} to '{}'", isr_token.value, target.value);

        let is_value = is_literal_text(&target.value)
            || target.value.starts_with('"')
            || self.program.find_alias(&target.value).is_some();
        if is_value || !is_valid_name(&target.value) {
            return Err(error_at(
                CompilationErrorKind::InvalidIsrArgument,
                &target,
            ));
        }

        self.put_symbol_reference(RelocationMode::Absolute, &target.value, vector);
        Ok(())
    }

    //-------------------------------------------------------------------------
    // Instructions

    /// Reads the operand (re-joining around a `,`), classifies it, narrows
    /// the mode against the instruction's variants and emits opcode plus
    /// operand bytes or relocation placeholders.
    pub fn emit_instruction(
        &mut self,
        line: &mut LineTokenizer,
        variants: &Variants,
    ) -> Result<(), CompilationError> {
        let operand = self.read_operand_token(line)?;
        let argument = parse_instruction_argument(operand.as_ref(), &self.program.aliases)?;

        let instruction_modes: BTreeSet<AddressMode> = variants.keys().copied().collect();
        let possible: BTreeSet<AddressMode> = argument
            .possible_modes
            .intersection(&instruction_modes)
            .copied()
            .collect();

        let report_token = |fallback: &str| -> Token {
            operand.clone().unwrap_or_else(|| Token {
                value: fallback.to_string(),
                location: line.location(),
            })
        };

        if possible.is_empty() {
            return Err(error_at(
                CompilationErrorKind::OperandModeNotSupported,
                &report_token(""),
            ));
        }

        let selected = select_mode(&possible, &argument.value)
            .map_err(|kind| error_at(kind, &report_token("")))?;
        let info = variants[&selected];

        match &argument.value {
            ArgumentValue::None => {
                let opcode = [info.opcode];
                self.emit_bytes(&report_token(""), &opcode)?;
            }
            ArgumentValue::Bytes(bytes) => {
                if (info.mode.operand_size() as usize) < bytes.len() {
                    return Err(error_at(
                        CompilationErrorKind::InvalidOperandSize,
                        &report_token(""),
                    ));
                }
                let mut out = vec![info.opcode];
                out.extend_from_slice(bytes);
                self.emit_bytes(&report_token(""), &out)?;
            }
            ArgumentValue::Symbol(name) => {
                let mode = if info.mode == AddressMode::Relative {
                    RelocationMode::Relative
                } else {
                    RelocationMode::Absolute
                };
                self.put_symbol_reference(mode, name, self.current_position.wrapping_add(1));
                let mut out = vec![info.opcode];
                out.extend(std::iter::repeat(0).take(mode.size() as usize));
                self.emit_bytes(&report_token(""), &out)?;
            }
        }
        Ok(())
    }

    /// The operand is one token, or `X , Y` split by the tokenizer and
    /// glued back together here.
    fn read_operand_token(
        &mut self,
        line: &mut LineTokenizer,
    ) -> Result<Option<Token>, CompilationError> {
        let Some(first) = line.next_token()? else {
            return Ok(None);
        };

        let Some(next) = line.next_token()? else {
            return Ok(Some(first));
        };
        if !next.is(",") {
            return Err(error_at(CompilationErrorKind::InvalidToken, &next));
        }
        let value = line.expect_token()?;

        Ok(Some(Token {
            value: format!("{},{}", first.value, value.value),
            location: first.location,
        }))
    }

    //-------------------------------------------------------------------------
    // Relocations

    fn put_symbol_reference(&mut self, mode: RelocationMode, symbol: &str, position: u16) {
        if self.program.find_symbol(symbol).is_none() {
            debug!(
                "Adding reference at {:04x} to unknown symbol '{}'",
                position, symbol
            );
            // The name cannot collide, find_symbol came back empty.
            let _ = self.program.add_symbol(SymbolInfo {
                name: symbol.to_string(),
                offset: None,
                imported: true,
            });
        } else {
            debug!("Adding reference at {:04x} to symbol '{}'", position, symbol);
        }

        self.program.add_relocation(RelocationInfo {
            target_symbol: symbol.to_string(),
            position,
            mode,
        });
    }

    /// The fix-up pass: writes every relocation's final bytes over its
    /// placeholders. An unresolved symbol self-targets, which leaves
    /// Absolute placeholders as zeros and turns a Relative one into a
    /// branch onto itself.
    pub fn update_relocations(&mut self) -> Result<(), CompilationError> {
        for relocation in self.program.relocations.clone() {
            let symbol = self
                .program
                .find_symbol(&relocation.target_symbol)
                .cloned()
                .unwrap_or(SymbolInfo {
                    name: relocation.target_symbol.clone(),
                    offset: None,
                    imported: true,
                });
            debug!(
                "Relocating reference to symbol '{}' at {:04x} ({})",
                symbol.name, relocation.position, relocation.mode
            );

            match relocation.mode {
                RelocationMode::Absolute => {
                    let Some(offset) = symbol.offset else {
                        continue;
                    };
                    self.put_with_overwrite(relocation.position, &offset.to_le_bytes())?;
                }
                RelocationMode::Relative => {
                    let target = symbol.offset.unwrap_or(relocation.position);
                    let jump = relative_jump_offset(relocation.position.wrapping_add(1), target)
                        .map_err(|error| {
                            CompilationError::new(
                                CompilationErrorKind::Unknown,
                                symbol.name.clone(),
                                None,
                            )
                            .with_detail(error.to_string())
                        })?;
                    self.put_with_overwrite(relocation.position, &[jump as u8])?;
                }
                RelocationMode::ZeroPage => {
                    let Some(offset) = symbol.offset else {
                        continue;
                    };
                    self.put_with_overwrite(relocation.position, &[offset as u8])?;
                }
            }
        }
        Ok(())
    }

    fn put_with_overwrite(&mut self, position: u16, bytes: &[u8]) -> Result<(), CompilationError> {
        self.program
            .sparse_binary_code
            .put_bytes(position, bytes, true)
            .map_err(program_error)
    }

    fn emit_bytes(&mut self, token: &Token, bytes: &[u8]) -> Result<(), CompilationError> {
        self.program
            .sparse_binary_code
            .put_bytes(self.current_position, bytes, false)
            .map_err(|error| error_at(CompilationErrorKind::InvalidToken, token)
                .with_detail(error.to_string()))?;
        self.current_position = self.current_position.wrapping_add(bytes.len() as u16);
        Ok(())
    }
}

fn program_error(error: ProgramError) -> CompilationError {
    CompilationError::new(CompilationErrorKind::Unknown, "", None).with_detail(error.to_string())
}

fn alias_word(alias: &ValueAlias) -> u16 {
    match alias.value.as_slice() {
        [low] => *low as u16,
        [low, high] => u16::from_le_bytes([*low, *high]),
        _ => 0,
    }
}

fn is_literal_text(text: &str) -> bool {
    text.starts_with('$')
        || text.starts_with("0x")
        || text.starts_with("0X")
        || (!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
}

fn is_valid_name(text: &str) -> bool {
    text.len() >= 2
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !text.chars().next().unwrap().is_ascii_digit()
}

/// The decoded bytes of a quoted-string token (quotes stripped).
fn quoted_bytes(token: &Token, trailing_zero: bool) -> Result<Vec<u8>, CompilationError> {
    let inner = token
        .value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| error_at(CompilationErrorKind::InvalidToken, token))?;
    let mut bytes: Vec<u8> = inner.chars().map(|c| c as u32 as u8).collect();
    if trailing_zero {
        bytes.push(0);
    }
    Ok(bytes)
}

/// Narrows the candidate set to the one emitted mode, given the argument's
/// resolved value.
fn select_mode(
    possible: &BTreeSet<AddressMode>,
    value: &ArgumentValue,
) -> Result<AddressMode, CompilationErrorKind> {
    let narrowed: BTreeSet<AddressMode> = match value {
        ArgumentValue::None => possible
            .iter()
            .copied()
            .filter(|mode| matches!(mode, AddressMode::Implied | AddressMode::RegisterA))
            .collect(),
        ArgumentValue::Bytes(bytes) => filter_modes_by_size(possible, bytes.len()),
        ArgumentValue::Symbol(_) => {
            if possible.contains(&AddressMode::Relative) {
                possible.clone()
            } else {
                // Symbols resolve too late for the zero-page family.
                filter_modes_by_size(possible, RelocationMode::Absolute.size() as usize)
            }
        }
    };

    let mut candidates = narrowed.into_iter();
    match (candidates.next(), candidates.next()) {
        (Some(mode), None) => Ok(mode),
        (None, _) => Err(CompilationErrorKind::OperandModeNotSupported),
        _ => Err(CompilationErrorKind::InvalidOperandSize),
    }
}
