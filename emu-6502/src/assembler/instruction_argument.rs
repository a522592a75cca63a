use std::collections::{BTreeSet, HashMap};

use emu_core::bytes::parse_packed_integral;
use emu_core::program::ValueAlias;

use super::compilation_error::{CompilationError, CompilationErrorKind};
use super::tokenizer::Token;
use crate::instruction_set::AddressMode;

/// What an operand resolved to: nothing (implied/accumulator), literal
/// bytes (literals and aliases collapse at parse time), or a symbol name
/// left for the relocation machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    None,
    Bytes(Vec<u8>),
    Symbol(String),
}

/// An operand classified by syntax: the set of address modes its shape
/// permits, before the instruction's own variants narrow it down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionArgument {
    pub possible_modes: BTreeSet<AddressMode>,
    pub value: ArgumentValue,
}

fn modes(list: &[AddressMode]) -> BTreeSet<AddressMode> {
    list.iter().copied().collect()
}

/// Keeps only the modes whose operand width matches `size`.
pub fn filter_modes_by_size(modes: &BTreeSet<AddressMode>, size: usize) -> BTreeSet<AddressMode> {
    modes
        .iter()
        .copied()
        .filter(|mode| mode.operand_size() as usize == size)
        .collect()
}

fn is_literal(text: &str) -> bool {
    text.starts_with('$')
        || text.starts_with("0x")
        || text.starts_with("0X")
        || (!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
}

fn is_symbol_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !text.chars().next().unwrap().is_ascii_digit()
}

/// Splits the operand into its addressing shape and the inner value text.
fn classify_shape(text: &str) -> Option<(BTreeSet<AddressMode>, &str)> {
    use AddressMode::*;

    if let Some(rest) = text.strip_prefix('#') {
        return Some((modes(&[Immediate]), rest));
    }
    if let Some(rest) = text.strip_prefix('(') {
        if let Some(inner) = rest.strip_suffix(",X)") {
            return Some((modes(&[IndirectX]), inner));
        }
        if let Some(inner) = rest.strip_suffix("),Y") {
            return Some((modes(&[IndirectY]), inner));
        }
        if let Some(inner) = rest.strip_suffix(')') {
            return Some((modes(&[Indirect]), inner));
        }
        return None;
    }
    if let Some(inner) = text.strip_suffix(",X") {
        return Some((modes(&[AbsoluteIndexedX, ZeroPageX]), inner));
    }
    if let Some(inner) = text.strip_suffix(",Y") {
        return Some((modes(&[AbsoluteIndexedY, ZeroPageY]), inner));
    }
    Some((modes(&[Absolute, ZeroPage, Relative]), text))
}

/// Classifies one operand against the alias table. `None` is the missing
/// operand of an implied instruction.
pub fn parse_instruction_argument(
    token: Option<&Token>,
    aliases: &HashMap<String, ValueAlias>,
) -> Result<InstructionArgument, CompilationError> {
    let Some(token) = token else {
        return Ok(InstructionArgument {
            possible_modes: modes(&[AddressMode::Implied]),
            value: ArgumentValue::None,
        });
    };

    if token.value == "A" {
        return Ok(InstructionArgument {
            possible_modes: modes(&[AddressMode::RegisterA]),
            value: ArgumentValue::None,
        });
    }

    let invalid = || {
        CompilationError::new(
            CompilationErrorKind::InvalidOperandArgument,
            token.value.clone(),
            Some(token.location.clone()),
        )
    };

    let (shape_modes, inner) = classify_shape(&token.value).ok_or_else(invalid)?;
    if inner.is_empty() {
        return Err(invalid());
    }

    let argument = if is_literal(inner) {
        let bytes = parse_packed_integral(inner, None).map_err(|_| invalid())?;
        let mut possible = shape_modes;
        // A literal address is never a branch target.
        possible.remove(&AddressMode::Relative);
        InstructionArgument {
            possible_modes: filter_modes_by_size(&possible, bytes.len()),
            value: ArgumentValue::Bytes(bytes),
        }
    } else if let Some(alias) = aliases.get(inner) {
        let mut possible = shape_modes;
        possible.remove(&AddressMode::Relative);
        InstructionArgument {
            possible_modes: filter_modes_by_size(&possible, alias.value.len()),
            value: ArgumentValue::Bytes(alias.value.clone()),
        }
    } else if is_symbol_name(inner) {
        InstructionArgument {
            possible_modes: shape_modes,
            value: ArgumentValue::Symbol(inner.to_string()),
        }
    } else {
        return Err(invalid());
    };

    if argument.possible_modes.is_empty() {
        return Err(invalid());
    }
    Ok(argument)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::assembler::tokenizer::TokenLocation;

    fn token(value: &str) -> Token {
        Token {
            value: value.to_string(),
            location: TokenLocation {
                input_name: Rc::new("test".to_string()),
                line: 1,
                column: 0,
                line_text: Rc::new(value.to_string()),
            },
        }
    }

    fn aliases() -> HashMap<String, ValueAlias> {
        let mut map = HashMap::new();
        map.insert(
            "byte".to_string(),
            ValueAlias {
                name: "byte".to_string(),
                value: vec![1],
            },
        );
        map.insert(
            "word".to_string(),
            ValueAlias {
                name: "word".to_string(),
                value: vec![1, 2],
            },
        );
        map
    }

    fn parse(text: &str) -> Result<InstructionArgument, CompilationError> {
        parse_instruction_argument(Some(&token(text)), &aliases())
    }

    fn expect(text: &str, expected_modes: &[AddressMode], value: ArgumentValue) {
        let argument = parse(text).unwrap();
        assert_eq!(
            argument.possible_modes,
            expected_modes.iter().copied().collect::<BTreeSet<_>>(),
            "modes for '{text}'"
        );
        assert_eq!(argument.value, value, "value for '{text}'");
    }

    use AddressMode::*;

    #[test]
    fn missing_operand_is_implied() {
        let argument = parse_instruction_argument(None, &aliases()).unwrap();
        assert_eq!(argument.possible_modes, modes(&[Implied]));
        assert_eq!(argument.value, ArgumentValue::None);
    }

    #[test]
    fn bare_a_is_the_accumulator() {
        expect("A", &[RegisterA], ArgumentValue::None);
    }

    #[test]
    fn immediate_forms() {
        expect("#$FF", &[Immediate], ArgumentValue::Bytes(vec![0xFF]));
        assert!(parse("#$FFFF").is_err());
        expect(
            "#LABEL",
            &[Immediate],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect("#byte", &[Immediate], ArgumentValue::Bytes(vec![1]));
        assert!(parse("#word").is_err());
    }

    #[test]
    fn indirect_absolute() {
        expect(
            "($55aa)",
            &[Indirect],
            ArgumentValue::Bytes(vec![0xAA, 0x55]),
        );
        expect(
            "(LABEL)",
            &[Indirect],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        assert!(parse("($55)").is_err());
    }

    #[test]
    fn indexed_absolutes_and_zero_pages() {
        expect(
            "$55aa,X",
            &[AbsoluteIndexedX],
            ArgumentValue::Bytes(vec![0xAA, 0x55]),
        );
        expect(
            "$55aa,Y",
            &[AbsoluteIndexedY],
            ArgumentValue::Bytes(vec![0xAA, 0x55]),
        );
        expect("$55,X", &[ZeroPageX], ArgumentValue::Bytes(vec![0x55]));
        expect("$55,Y", &[ZeroPageY], ArgumentValue::Bytes(vec![0x55]));
    }

    #[test]
    fn indexed_symbols_keep_both_widths() {
        expect(
            "LABEL,X",
            &[AbsoluteIndexedX, ZeroPageX],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect(
            "LABEL,Y",
            &[AbsoluteIndexedY, ZeroPageY],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect("byte,X", &[ZeroPageX], ArgumentValue::Bytes(vec![1]));
        expect(
            "word,X",
            &[AbsoluteIndexedX],
            ArgumentValue::Bytes(vec![1, 2]),
        );
    }

    #[test]
    fn bare_values_and_names() {
        expect(
            "LABEL",
            &[Absolute, ZeroPage, Relative],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect("$12", &[ZeroPage], ArgumentValue::Bytes(vec![0x12]));
        expect(
            "$55aa",
            &[Absolute],
            ArgumentValue::Bytes(vec![0xAA, 0x55]),
        );
        expect("byte", &[ZeroPage], ArgumentValue::Bytes(vec![1]));
        expect("word", &[Absolute], ArgumentValue::Bytes(vec![1, 2]));
        // 0x and decimal literals classify as values, same as $.
        expect("0x12", &[ZeroPage], ArgumentValue::Bytes(vec![0x12]));
        expect("100", &[ZeroPage], ArgumentValue::Bytes(vec![100]));
    }

    #[test]
    fn indexed_indirect() {
        expect("($FF,X)", &[IndirectX], ArgumentValue::Bytes(vec![0xFF]));
        expect(
            "(LABEL,X)",
            &[IndirectX],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect("(byte,X)", &[IndirectX], ArgumentValue::Bytes(vec![1]));
        assert!(parse("(word,X)").is_err());
    }

    #[test]
    fn indirect_indexed() {
        expect("($FF),Y", &[IndirectY], ArgumentValue::Bytes(vec![0xFF]));
        expect(
            "(LABEL),Y",
            &[IndirectY],
            ArgumentValue::Symbol("LABEL".to_string()),
        );
        expect("(byte),Y", &[IndirectY], ArgumentValue::Bytes(vec![1]));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("()").is_err());
        assert!(parse("#").is_err());
        assert!(parse("(oops").is_err());
        assert!(parse("na me").is_err());
        assert!(parse("1abc").is_err());
    }
}
