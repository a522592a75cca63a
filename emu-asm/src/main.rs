use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use emu_6502::assembler::{compile_string, CompilationError};
use emu_6502::instruction_set::InstructionSet;
use emu_core::program::Program;

/// 6502 assembler: turns one source file into a flat binary image and
/// symbol diagnostics.
#[derive(Parser)]
#[command(name = "emu-asm", version, about, disable_help_subcommand = true)]
struct Cli {
    /// Source file, or `-` for stdin
    input: PathBuf,

    /// Write the 65536-byte binary image here
    #[arg(long)]
    bin_output: Option<PathBuf>,

    /// Write a hex dump of the occupied addresses here
    #[arg(long)]
    hex_dump: Option<PathBuf>,

    /// Print diagnostic logs during compilation
    #[arg(short, long)]
    verbose: bool,
}

fn read_input(input: &PathBuf) -> std::io::Result<(String, String)> {
    if input.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok((text, "stdin".to_string()))
    } else {
        Ok((
            std::fs::read_to_string(input)?,
            input.display().to_string(),
        ))
    }
}

fn store_outputs(cli: &Cli, program: &Program) -> std::io::Result<()> {
    if let Some(path) = &cli.bin_output {
        std::fs::write(path, program.sparse_binary_code.dump_memory())?;
    }
    if let Some(path) = &cli.hex_dump {
        std::fs::write(path, program.sparse_binary_code.hex_dump(""))?;
    }
    Ok(())
}

fn report_compilation_error(error: &CompilationError) {
    eprintln!("{} {}", "Error:".bright_red(), error.message());
    let pointer = error.source_pointer();
    if !pointer.is_empty() {
        eprint!("{}", pointer.bright_white());
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let (text, input_name) = match read_input(&cli.input) {
        Ok(input) => input,
        Err(error) => {
            eprintln!("Error: cannot read {}: {error}", cli.input.display());
            return ExitCode::from(255);
        }
    };

    log::debug!("Compiling {input_name}");
    let program = match compile_string(&text, InstructionSet::Nmos6502Emu) {
        Ok(program) => program,
        Err(error) => {
            report_compilation_error(&error);
            return ExitCode::from(error.exit_code() as u8);
        }
    };

    if cli.verbose {
        log::debug!("Compiled program:\n{program}");
    }

    match store_outputs(&cli, &program) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: cannot write output: {error}");
            ExitCode::from(255)
        }
    }
}
