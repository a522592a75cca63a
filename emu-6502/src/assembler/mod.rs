mod compilation_context;
mod compilation_error;
mod compiler;
mod instruction_argument;
mod tokenizer;

pub use compilation_error::{CompilationError, CompilationErrorKind};
pub use compiler::{compile_file, compile_string, Compiler};
pub use instruction_argument::{ArgumentValue, InstructionArgument};
pub use tokenizer::{LineTokenizer, Token, TokenLocation, Tokenizer};
