use std::fmt;

use thiserror::Error;

use super::tokenizer::TokenLocation;

/// Deterministic, user-visible compilation failures. The discriminant is
/// the assembler's process exit code for that failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationErrorKind {
    Unknown = 1,
    UnknownCommand = 2,
    UnexpectedInput = 3,
    UnexpectedEndOfInput = 4,
    InvalidToken = 5,
    SymbolRedefinition = 6,
    AliasRedefinition = 7,
    UnknownIsr = 8,
    InvalidIsrArgument = 9,
    SymbolIsNotAllowed = 10,
    AliasIsNotAllowed = 11,
    InvalidOperandSize = 12,
    InvalidOperandArgument = 13,
    OperandModeNotSupported = 14,
    InvalidCommandArgument = 15,
    InvalidEscapeSequence = 16,
    UnfinishedQuotedString = 17,
}

impl CompilationErrorKind {
    pub fn exit_code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        use CompilationErrorKind::*;
        match self {
            Unknown => "Unknown",
            UnknownCommand => "UnknownCommand",
            UnexpectedInput => "UnexpectedInput",
            UnexpectedEndOfInput => "UnexpectedEndOfInput",
            InvalidToken => "InvalidToken",
            SymbolRedefinition => "SymbolRedefinition",
            AliasRedefinition => "AliasRedefinition",
            UnknownIsr => "UnknownIsr",
            InvalidIsrArgument => "InvalidIsrArgument",
            SymbolIsNotAllowed => "SymbolIsNotAllowed",
            AliasIsNotAllowed => "AliasIsNotAllowed",
            InvalidOperandSize => "InvalidOperandSize",
            InvalidOperandArgument => "InvalidOperandArgument",
            OperandModeNotSupported => "OperandModeNotSupported",
            InvalidCommandArgument => "InvalidCommandArgument",
            InvalidEscapeSequence => "InvalidEscapeSequence",
            UnfinishedQuotedString => "UnfinishedQuotedString",
        }
    }
}

impl fmt::Display for CompilationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compilation failure with the offending token's text and location.
#[derive(Debug, Clone, Error)]
#[error("{}", self.message())]
pub struct CompilationError {
    pub kind: CompilationErrorKind,
    pub detail: String,
    pub token: String,
    pub location: Option<TokenLocation>,
}

impl CompilationError {
    pub fn new(
        kind: CompilationErrorKind,
        token: impl Into<String>,
        location: Option<TokenLocation>,
    ) -> CompilationError {
        CompilationError {
            kind,
            detail: String::new(),
            token: token.into(),
            location,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> CompilationError {
        self.detail = detail.into();
        self
    }

    fn default_detail(&self) -> String {
        use CompilationErrorKind::*;
        match self.kind {
            UnexpectedInput => format!("'{}' was not expected", self.token),
            UnexpectedEndOfInput => format!("more input was expected after '{}'", self.token),
            InvalidToken => format!("'{}' is not valid in its context", self.token),
            SymbolRedefinition => format!("symbol '{}' is already defined", self.token),
            AliasRedefinition => format!("alias '{}' is already defined", self.token),
            UnknownCommand => format!("unknown directive '{}'", self.token),
            UnknownIsr => format!("unknown isr '{}'", self.token),
            UnfinishedQuotedString => "quoted string is not terminated".to_string(),
            InvalidEscapeSequence => format!("malformed escape sequence in '{}'", self.token),
            _ => format!("'{}'", self.token),
        }
    }

    /// `<token location> : <kind> : <detail>`
    pub fn message(&self) -> String {
        let location = match &self.location {
            Some(location) => location.to_string(),
            None => "?".to_string(),
        };
        let detail = if self.detail.is_empty() {
            self.default_detail()
        } else {
            self.detail.clone()
        };
        format!(
            "Token '{}' at {} : {} : {}",
            self.token, location, self.kind, detail
        )
    }

    /// The offending source line with a caret under the column, for CLI
    /// diagnostics.
    pub fn source_pointer(&self) -> String {
        match &self.location {
            Some(location) => location.description(),
            None => String::new(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_positive() {
        use CompilationErrorKind::*;
        let kinds = [
            Unknown,
            UnknownCommand,
            UnexpectedInput,
            UnexpectedEndOfInput,
            InvalidToken,
            SymbolRedefinition,
            AliasRedefinition,
            UnknownIsr,
            InvalidIsrArgument,
            SymbolIsNotAllowed,
            AliasIsNotAllowed,
            InvalidOperandSize,
            InvalidOperandArgument,
            OperandModeNotSupported,
            InvalidCommandArgument,
            InvalidEscapeSequence,
            UnfinishedQuotedString,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|&code| code > 0));
    }

    #[test]
    fn message_carries_kind_and_token() {
        let error = CompilationError::new(CompilationErrorKind::SymbolRedefinition, "LOOP", None);
        let message = error.message();
        assert!(message.contains("SymbolRedefinition"));
        assert!(message.contains("LOOP"));
    }
}
