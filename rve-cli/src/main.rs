use std::error::Error as _;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

mod console;
mod loader;

use clap::Parser;
use console::Console;
use goblin::elf::Elf;
use loader::LoadError;
use log::{info, warn};
use rve_core::{Config, Core, HartError, Step};
use stderrlog::LogLevelNum;
use thiserror::Error;

/// Host output is flushed and input polled once every this many cycles.
const CONSOLE_INTERVAL: u64 = 1024;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Increase log verbosity. Can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Silence all log output.
    #[arg(short, long)]
    quiet: bool,
    /// Load the image as a flat binary at the reset vector instead of parsing it as ELF.
    #[arg(long)]
    raw: bool,
    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Write the words between `begin_signature` and `end_signature` to this file on exit.
    #[arg(long, conflicts_with = "raw")]
    signature: Option<PathBuf>,
    /// Print the hart state when the run ends.
    #[arg(long)]
    dump: bool,
    /// Program image to execute.
    image: PathBuf,
}

#[derive(Error, Debug)]
enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("hart stopped: {0}")]
    Hart(#[from] HartError),
    #[error("console: {0}")]
    Console(io::Error),
    #[error("failed to write signature: {0}")]
    Signature(io::Error),
}

/// How a run ended, short of a fatal error.
enum Outcome {
    Exited(u32),
    CycleLimit,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = stderrlog::new()
        .verbosity(log_level(args.verbose))
        .quiet(args.quiet)
        .modules([module_path!(), "rve_core"])
        .init()
    {
        eprintln!("failed to set up logging: {e}");
    }

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(inner) = cause {
                eprintln!("  caused by: {inner}");
                cause = inner.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn log_level(verbose: u8) -> LogLevelNum {
    match verbose {
        0 => LogLevelNum::Warn,
        1 => LogLevelNum::Info,
        2 => LogLevelNum::Debug,
        _ => LogLevelNum::Trace,
    }
}

fn run(args: &Args) -> Result<ExitCode, Error> {
    let mut buf = Vec::new();
    File::open(&args.image)
        .and_then(|mut file| file.read_to_end(&mut buf))
        .map_err(LoadError::Io)?;

    let mut core = Core::new(Config::default())?;

    let signature = if args.raw {
        loader::load_raw(&mut core, &buf)?;
        None
    } else {
        let elf = Elf::parse(&buf).map_err(LoadError::Elf)?;
        loader::load_elf(&mut core, &elf, &buf)?;
        match &args.signature {
            Some(path) => Some((path, loader::signature_range(&elf)?)),
            None => None,
        }
    };

    let mut console = Console::spawn();
    let outcome = run_loop(&mut core, &mut console, args.max_cycles);
    console
        .service(core.uart_mut())
        .map_err(Error::Console)?;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{}", core.dump());
            return Err(e);
        }
    };

    if args.dump {
        eprintln!("{}", core.dump());
    }

    match outcome {
        Outcome::Exited(code) => {
            info!("program exited with status {code}");
            if let Some((path, range)) = signature {
                let mut file = BufWriter::new(File::create(path).map_err(Error::Signature)?);
                loader::write_signature(&core, range, &mut file)
                    .and_then(|()| file.flush())
                    .map_err(Error::Signature)?;
            }
            Ok(ExitCode::from(code as u8))
        }
        Outcome::CycleLimit => {
            warn!("cycle limit reached at pc {:#010x}", core.registers().pc());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_loop(
    core: &mut Core,
    console: &mut Console,
    max_cycles: Option<u64>,
) -> Result<Outcome, Error> {
    loop {
        if max_cycles.is_some_and(|max| core.clock() >= max) {
            return Ok(Outcome::CycleLimit);
        }
        if let Step::Exited(code) = core.step()? {
            return Ok(Outcome::Exited(code));
        }
        if core.clock() % CONSOLE_INTERVAL == 0 {
            console
                .service(core.uart_mut())
                .map_err(Error::Console)?;
        }
    }
}
