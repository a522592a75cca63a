use std::fmt;
use std::rc::Rc;

use super::compilation_error::{CompilationError, CompilationErrorKind};

/// Where a token came from, kept alongside the full line text so errors can
/// point at the exact column.
#[derive(Debug, Clone)]
pub struct TokenLocation {
    pub input_name: Rc<String>,
    /// 1-based.
    pub line: usize,
    /// 0-based column of the token's first character.
    pub column: usize,
    pub line_text: Rc<String>,
}

impl TokenLocation {
    /// The source line plus a caret under the offending column.
    pub fn description(&self) -> String {
        let mut out = format!("{:04}: {}\n", self.line, self.line_text);
        out.push_str(&" ".repeat(self.column + 6));
        out.push_str("^\n");
        out
    }
}

impl fmt::Display for TokenLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.input_name, self.line, self.column)
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub location: TokenLocation,
}

impl Token {
    pub fn upper(&self) -> String {
        self.value.to_uppercase()
    }

    pub fn lower(&self) -> String {
        self.value.to_lowercase()
    }

    pub fn is(&self, text: &str) -> bool {
        self.value == text
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token '{}' at {}", self.value, self.location)
    }
}

/// Splits input into lines; each line tokenizes independently.
pub struct Tokenizer {
    input_name: Rc<String>,
    lines: Vec<Rc<String>>,
    next_line: usize,
}

impl Tokenizer {
    pub fn new(text: &str, input_name: &str) -> Tokenizer {
        Tokenizer {
            input_name: Rc::new(input_name.to_string()),
            lines: text.lines().map(|line| Rc::new(line.to_string())).collect(),
            next_line: 0,
        }
    }

    pub fn has_input(&self) -> bool {
        self.next_line < self.lines.len()
    }

    pub fn next_line(&mut self) -> Option<LineTokenizer> {
        let line_text = self.lines.get(self.next_line)?.clone();
        self.next_line += 1;
        Some(LineTokenizer {
            input_name: self.input_name.clone(),
            line_number: self.next_line,
            line_text,
            column: 0,
        })
    }
}

pub struct LineTokenizer {
    input_name: Rc<String>,
    line_number: usize,
    line_text: Rc<String>,
    column: usize,
}

impl LineTokenizer {
    pub fn location(&self) -> TokenLocation {
        TokenLocation {
            input_name: self.input_name.clone(),
            line: self.line_number,
            column: self.column,
            line_text: self.line_text.clone(),
        }
    }

    fn rest(&self) -> &str {
        &self.line_text[self.column..]
    }

    fn skip_to_next_token(&mut self) {
        loop {
            let rest = self.rest();
            match rest.chars().next() {
                Some(c) if c.is_whitespace() => self.column += c.len_utf8(),
                // Comment runs to the end of the line.
                Some(';') => self.column = self.line_text.len(),
                _ => return,
            }
        }
    }

    pub fn has_input(&mut self) -> bool {
        self.skip_to_next_token();
        !self.rest().is_empty()
    }

    fn token(&self, value: String, column: usize) -> Token {
        Token {
            value,
            location: TokenLocation {
                input_name: self.input_name.clone(),
                line: self.line_number,
                column,
                line_text: self.line_text.clone(),
            },
        }
    }

    /// The next token, or `None` at end of line. Tokens are the `,` and `=`
    /// punctuators, quoted strings (with escapes decoded into the value,
    /// quotes kept), and maximal runs of everything else.
    pub fn next_token(&mut self) -> Result<Option<Token>, CompilationError> {
        self.skip_to_next_token();
        let start = self.column;
        let rest = self.rest();

        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };

        match first {
            '"' => {
                let (value, consumed) = parse_quoted_string(rest).map_err(|mut error| {
                    error.location = Some(self.token(String::new(), start).location);
                    error
                })?;
                self.column += consumed;
                Ok(Some(self.token(value, start)))
            }
            ',' | '=' => {
                self.column += 1;
                Ok(Some(self.token(first.to_string(), start)))
            }
            _ => {
                let length = rest
                    .find(|c: char| c.is_whitespace() || matches!(c, ';' | ',' | '='))
                    .unwrap_or(rest.len());
                let value = rest[..length].to_string();
                self.column += length;
                Ok(Some(self.token(value, start)))
            }
        }
    }

    /// All remaining tokens joined by `separator`. A leading, doubled or
    /// missing separator is an error; a trailing one is tolerated.
    pub fn token_list(&mut self, separator: &str) -> Result<Vec<Token>, CompilationError> {
        let mut tokens = Vec::new();
        loop {
            if !self.has_input() {
                return Ok(tokens);
            }
            let token = self.expect_token()?;
            if token.is(separator) {
                return Err(CompilationError::new(
                    CompilationErrorKind::Unknown,
                    token.value,
                    Some(token.location),
                )
                .with_detail("empty element in list"));
            }
            tokens.push(token);

            if !self.has_input() {
                return Ok(tokens);
            }
            let next = self.expect_token()?;
            if !next.is(separator) {
                return Err(CompilationError::new(
                    CompilationErrorKind::Unknown,
                    next.value,
                    Some(next.location),
                )
                .with_detail(format!("expected separator '{separator}'")));
            }
        }
    }

    /// `next_token`, but running out of input is an error.
    pub fn expect_token(&mut self) -> Result<Token, CompilationError> {
        let location = {
            self.skip_to_next_token();
            self.location()
        };
        self.next_token()?.ok_or_else(|| {
            CompilationError::new(
                CompilationErrorKind::UnexpectedEndOfInput,
                "",
                Some(location),
            )
        })
    }
}

/// Decodes the escapes of a quoted string. Returns the token value (quotes
/// included, escapes resolved) and the number of input bytes consumed.
fn parse_quoted_string(input: &str) -> Result<(String, usize), CompilationError> {
    let mut out = String::from('"');
    let mut chars = input.char_indices().skip(1).peekable();

    while let Some((index, c)) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                return Ok((out, index + 1));
            }
            '\\' => {
                let rest = &input[index + 1..];
                let (decoded, consumed) = parse_escape_sequence(rest)?;
                out.push(decoded);
                // Skip the escape body.
                for _ in 0..consumed {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    Err(CompilationError::new(
        CompilationErrorKind::UnfinishedQuotedString,
        input,
        None,
    ))
}

/// One escape after the backslash: the C-style single characters, `\xHH`
/// hex, `\0NN` octal, `\NNN` decimal. Returns the character and how many
/// input characters the escape body used.
fn parse_escape_sequence(input: &str) -> Result<(char, usize), CompilationError> {
    let error = || CompilationError::new(CompilationErrorKind::InvalidEscapeSequence, input, None);

    let mut chars = input.chars();
    let first = chars.next().ok_or_else(error)?;
    match first {
        'a' => Ok(('\x07', 1)),
        'b' => Ok(('\x08', 1)),
        't' => Ok(('\t', 1)),
        'n' => Ok(('\n', 1)),
        'v' => Ok(('\x0B', 1)),
        'f' => Ok(('\x0C', 1)),
        'r' => Ok(('\r', 1)),
        '\\' => Ok(('\\', 1)),
        '"' => Ok(('"', 1)),
        'x' => {
            let digits: String = chars.take_while(|c| c.is_ascii_hexdigit()).collect();
            if digits.is_empty() {
                return Err(error());
            }
            let value = u32::from_str_radix(&digits, 16).map_err(|_| error())?;
            let byte = u8::try_from(value).map_err(|_| error())?;
            Ok((byte as char, 1 + digits.len()))
        }
        '0' => {
            let digits: String = chars.take_while(|c| ('0'..='7').contains(c)).collect();
            if digits.is_empty() {
                // A bare \0 is NUL.
                return Ok(('\0', 1));
            }
            let value = u32::from_str_radix(&digits, 8).map_err(|_| error())?;
            let byte = u8::try_from(value).map_err(|_| error())?;
            Ok((byte as char, 1 + digits.len()))
        }
        c if c.is_ascii_digit() => {
            let digits: String = input.chars().take_while(|c| c.is_ascii_digit()).collect();
            let value: u32 = digits.parse().map_err(|_| error())?;
            let byte = u8::try_from(value).map_err(|_| error())?;
            Ok((byte as char, digits.len()))
        }
        _ => Err(error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize_line(text: &str) -> Vec<String> {
        let mut tokenizer = Tokenizer::new(text, "test");
        let mut line = tokenizer.next_line().unwrap();
        let mut tokens = Vec::new();
        while let Some(token) = line.next_token().unwrap() {
            tokens.push(token.value);
        }
        tokens
    }

    #[test]
    fn splits_atoms_on_whitespace() {
        assert_eq!(tokenize_line("LDA #$44"), vec!["LDA", "#$44"]);
        assert_eq!(tokenize_line("  nop  "), vec!["nop"]);
    }

    #[test]
    fn comma_and_equals_are_their_own_tokens() {
        assert_eq!(
            tokenize_line("STA $1000,Y"),
            vec!["STA", "$1000", ",", "Y"]
        );
        assert_eq!(tokenize_line("WIDTH = 0x20"), vec!["WIDTH", "=", "0x20"]);
        assert_eq!(tokenize_line("a=b"), vec!["a", "=", "b"]);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(tokenize_line("INX ; bump the counter"), vec!["INX"]);
        assert_eq!(tokenize_line("; nothing here"), Vec::<String>::new());
    }

    #[test]
    fn quoted_strings_keep_their_quotes() {
        assert_eq!(tokenize_line(r#".text "hello there""#), vec![
            ".text",
            "\"hello there\""
        ]);
    }

    #[test]
    fn character_escapes_decode() {
        assert_eq!(tokenize_line(r#""a\tb\n""#), vec!["\"a\tb\n\""]);
        assert_eq!(tokenize_line(r#""q\"q""#), vec!["\"q\"q\""]);
        assert_eq!(tokenize_line(r#""\\""#), vec!["\"\\\""]);
    }

    #[test]
    fn numeric_escapes_decode() {
        // Decimal, octal, hex.
        assert_eq!(tokenize_line(r#""\65""#), vec!["\"A\""]);
        assert_eq!(tokenize_line(r#""\0101""#), vec!["\"A\""]);
        assert_eq!(tokenize_line(r#""\x41""#), vec!["\"A\""]);
    }

    #[test]
    fn overflowing_escape_is_fatal() {
        let mut tokenizer = Tokenizer::new(r#""\999""#, "test");
        let mut line = tokenizer.next_line().unwrap();
        let error = line.next_token().unwrap_err();
        assert_eq!(error.kind, CompilationErrorKind::InvalidEscapeSequence);
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let mut tokenizer = Tokenizer::new("\"oops", "test");
        let mut line = tokenizer.next_line().unwrap();
        let error = line.next_token().unwrap_err();
        assert_eq!(error.kind, CompilationErrorKind::UnfinishedQuotedString);
    }

    #[test]
    fn locations_track_line_and_column() {
        let mut tokenizer = Tokenizer::new("nop\n  lda #$01", "prog.asm");
        let mut first = tokenizer.next_line().unwrap();
        let token = first.next_token().unwrap().unwrap();
        assert_eq!(token.location.line, 1);
        assert_eq!(token.location.column, 0);

        let mut second = tokenizer.next_line().unwrap();
        let token = second.next_token().unwrap().unwrap();
        assert_eq!(token.location.line, 2);
        assert_eq!(token.location.column, 2);
        assert_eq!(*token.location.line_text, "  lda #$01");
        assert_eq!(token.location.to_string(), "prog.asm:2:2");
    }

    #[test]
    fn token_list_with_separator() {
        let mut tokenizer = Tokenizer::new("1, 2 , 3", "test");
        let mut line = tokenizer.next_line().unwrap();
        let values: Vec<String> = line
            .token_list(",")
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[test]
    fn token_list_rejects_doubled_separator() {
        let mut tokenizer = Tokenizer::new("1,,2", "test");
        let mut line = tokenizer.next_line().unwrap();
        assert!(line.token_list(",").is_err());
    }

    #[test]
    fn token_list_rejects_leading_separator() {
        let mut tokenizer = Tokenizer::new(",1", "test");
        let mut line = tokenizer.next_line().unwrap();
        assert!(line.token_list(",").is_err());
    }
}
