use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ByteParseError {
    #[error("cannot parse '{text}' as a number")]
    Malformed { text: String },

    #[error("value '{text}' does not fit in {width} byte(s)")]
    WidthExceeded { text: String, width: usize },
}

fn split_radix(text: &str) -> (&str, u32) {
    if let Some(digits) = text.strip_prefix('$') {
        (digits, 16)
    } else if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (digits, 16)
    } else {
        (text, 10)
    }
}

fn parse_value(text: &str, limit: u32) -> Result<u32, ByteParseError> {
    let (digits, radix) = split_radix(text);
    if digits.is_empty() {
        return Err(ByteParseError::Malformed {
            text: text.to_string(),
        });
    }
    let value = u32::from_str_radix(digits, radix).map_err(|_| ByteParseError::Malformed {
        text: text.to_string(),
    })?;
    if value > limit {
        return Err(ByteParseError::WidthExceeded {
            text: text.to_string(),
            width: if limit <= 0xFF { 1 } else { 2 },
        });
    }
    Ok(value)
}

/// Parses `$HH`, `0xHH` or decimal into a byte.
pub fn parse_byte(text: &str) -> Result<u8, ByteParseError> {
    Ok(parse_value(text, 0xFF)? as u8)
}

/// Parses `$HHHH`, `0xHHHH` or decimal into a word.
pub fn parse_word(text: &str) -> Result<u16, ByteParseError> {
    Ok(parse_value(text, 0xFFFF)? as u16)
}

/// Parses a literal into little-endian bytes. Without an expected size, the
/// width is inferred from the value: one byte up to 0xFF, two above. An
/// explicit size of 1, 2 or 4 pads or rejects as needed; leading zeros do
/// not widen a value (`$0012` is still one byte).
pub fn parse_packed_integral(
    text: &str,
    expected_size: Option<usize>,
) -> Result<Vec<u8>, ByteParseError> {
    let value = parse_value(text, u32::MAX)?;
    let natural = if value <= 0xFF {
        1
    } else if value <= 0xFFFF {
        2
    } else {
        4
    };
    let size = expected_size.unwrap_or(natural);
    if natural > size || !matches!(size, 1 | 2 | 4) {
        return Err(ByteParseError::WidthExceeded {
            text: text.to_string(),
            width: size,
        });
    }
    Ok(value.to_le_bytes()[..size].to_vec())
}

pub fn to_bytes_u16(value: u16) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("relative jump {position:04x}->{target:04x} is too far")]
pub struct RelativeJumpError {
    pub position: u16,
    pub target: u16,
}

/// Signed byte delta for a relative branch. `position` is the address right
/// after the offset byte.
pub fn relative_jump_offset(position: u16, target: u16) -> Result<i8, RelativeJumpError> {
    let delta = target as i32 - position as i32;
    i8::try_from(delta).map_err(|_| RelativeJumpError { position, target })
}
