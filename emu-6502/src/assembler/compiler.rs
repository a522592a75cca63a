use std::collections::HashMap;
use std::path::Path;

use emu_core::program::Program;

use super::compilation_context::CompilationContext;
use super::compilation_error::{CompilationError, CompilationErrorKind};
use super::tokenizer::{LineTokenizer, Tokenizer};
use crate::instruction_set::{mnemonic_map, AddressMode, InstructionSet, OpcodeInfo};

/// Two-pass assembler driver: pass one tokenizes each line into the
/// program's sparse code, symbols and relocations; pass two fixes up every
/// relocation once all definitions were seen.
pub struct Compiler {
    mnemonics: HashMap<&'static str, HashMap<AddressMode, &'static OpcodeInfo>>,
}

pub fn compile_string(text: &str, set: InstructionSet) -> Result<Program, CompilationError> {
    Compiler::new(set).compile(&mut Tokenizer::new(text, "string"))
}

pub fn compile_file(path: &Path, set: InstructionSet) -> Result<Program, CompilationError> {
    let text = std::fs::read_to_string(path).map_err(|error| {
        CompilationError::new(
            CompilationErrorKind::Unknown,
            path.display().to_string(),
            None,
        )
        .with_detail(error.to_string())
    })?;
    Compiler::new(set).compile(&mut Tokenizer::new(&text, &path.display().to_string()))
}

impl Compiler {
    pub fn new(set: InstructionSet) -> Compiler {
        Compiler {
            mnemonics: mnemonic_map(set),
        }
    }

    pub fn compile(&self, tokenizer: &mut Tokenizer) -> Result<Program, CompilationError> {
        let mut program = Program::new();
        let mut context = CompilationContext::new(&mut program);

        while let Some(mut line) = tokenizer.next_line() {
            self.process_line(&mut context, &mut line)?;
        }
        context.update_relocations()?;

        Ok(program)
    }

    /// A line holds any run of labels, directives, instructions and alias
    /// definitions; `NAME: LDA #$01` is two constructs on one line.
    fn process_line(
        &self,
        context: &mut CompilationContext,
        line: &mut LineTokenizer,
    ) -> Result<(), CompilationError> {
        while line.has_input() {
            let Some(first) = line.next_token()? else {
                return Ok(());
            };

            if first.value.ends_with(':') {
                context.begin_symbol(&first)?;
                continue;
            }
            if first.value.starts_with('.') {
                context.handle_command(&first, line)?;
                continue;
            }
            if let Some(variants) = self.mnemonics.get(first.upper().as_str()) {
                context.emit_instruction(line, variants)?;
                continue;
            }

            if !line.has_input() {
                return Err(CompilationError::new(
                    CompilationErrorKind::InvalidToken,
                    first.value,
                    Some(first.location),
                ));
            }
            let second = line.expect_token()?;
            if second.is("=") || second.lower() == "equ" {
                let value = line.expect_token()?;
                if line.has_input() {
                    let extra = line.expect_token()?;
                    return Err(CompilationError::new(
                        CompilationErrorKind::UnexpectedInput,
                        extra.value,
                        Some(extra.location),
                    ));
                }
                context.add_alias_definition(&first, &value)?;
                continue;
            }

            return Err(CompilationError::new(
                CompilationErrorKind::InvalidToken,
                first.value,
                Some(first.location),
            ));
        }
        Ok(())
    }
}
