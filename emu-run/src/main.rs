mod simulation;

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use emu_core::memory::SharedMemory;
use emu_devices::tty::{BaudRate, TtyDevice, DEFAULT_FIFO_DEPTH, DEVICE_SIZE};

use simulation::{Outcome, SimulationBuilder};

/// 6502 runner: executes a flat binary image until the program halts.
#[derive(Parser)]
#[command(name = "emu-run", version, about, disable_help_subcommand = true)]
struct Cli {
    /// Raw binary image, up to 64 KiB, loaded at address 0
    image: PathBuf,

    /// CPU clock in Hz; 0 runs unpaced
    #[arg(long, default_value_t = 1_000_000)]
    frequency: u64,

    /// Give up after this many seconds of wall time
    #[arg(long)]
    timeout: Option<f64>,

    /// Mount a TTY device at this base address, wired to stdin/stdout
    #[arg(long, value_parser = parse_address)]
    tty: Option<u16>,

    /// Trace every executed instruction
    #[arg(short, long)]
    verbose: bool,
}

fn parse_address(text: &str) -> Result<u16, String> {
    emu_core::bytes::parse_word(text).map_err(|error| error.to_string())
}

fn run(cli: &Cli) -> Result<ExitCode, String> {
    let image = std::fs::read(&cli.image)
        .map_err(|error| format!("cannot read {}: {error}", cli.image.display()))?;
    if image.len() > 0x10000 {
        return Err(format!(
            "image {} is larger than the 16-bit address space",
            cli.image.display()
        ));
    }

    let mut builder = SimulationBuilder::new(cli.frequency)
        .map_err(|error| error.to_string())?
        .verbose(cli.verbose);

    if let Some(base) = cli.tty {
        if base > 0xFFFF - (DEVICE_SIZE - 1) {
            return Err(format!(
                "tty base {base:#06x} leaves no room for the device registers"
            ));
        }
        // The TTY window replaces that slice of RAM, so mount it first.
        let tty: SharedMemory = Rc::new(RefCell::new(
            TtyDevice::new(
                Some(Box::new(std::io::stdin())),
                Some(Box::new(std::io::stdout())),
                builder.clock(),
                BaudRate::default(),
                DEFAULT_FIFO_DEPTH,
                true,
            )
            .map_err(|error| error.to_string())?,
        ));
        builder = builder
            .with_device(base, base + (DEVICE_SIZE - 1), tty)
            .map_err(|error| error.to_string())?;
        // RAM everywhere around the device window.
        if base > 0 {
            builder = builder
                .with_ram_window(0x0000, base - 1, &image)
                .map_err(|error| error.to_string())?;
        }
        if let Some(after) = base.checked_add(DEVICE_SIZE) {
            builder = builder
                .with_ram_window(after, 0xFFFF, &image)
                .map_err(|error| error.to_string())?;
        }
    } else {
        builder = builder
            .with_ram_image(&image)
            .map_err(|error| error.to_string())?;
    }

    let mut simulation = builder.build();
    let summary = simulation.run(cli.timeout.map(Duration::from_secs_f64));

    log::debug!(
        "Run took {:?} and {} cycles",
        summary.duration,
        summary.cycles
    );

    match summary.outcome {
        Outcome::Halted(code) => {
            if cli.verbose {
                eprintln!("HALT code: {code:#04x}");
            }
            Ok(ExitCode::from(code))
        }
        Outcome::TimedOut => {
            eprintln!(
                "Execution timed out after {:.3}s ({} cycles)",
                summary.duration.as_secs_f64(),
                summary.cycles
            );
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Fault(error) => Err(error.to_string()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match run(&cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("Run error: {message}");
            ExitCode::from(255)
        }
    }
}
