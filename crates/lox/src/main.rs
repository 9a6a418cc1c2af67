//! `lox` — CLI and REPL driver for the bytecode compiler and virtual
//! machine implemented in `lox-compiler` and `lox-vm`.
//!
//! Usage:
//!   lox            # interactive REPL; EOF (Ctrl-D) ends the session
//!   lox <path>     # run a source file, then exit
//!
//! Exit codes: 0 success, 65 compile error, 70 runtime error, 64 usage
//! error (wrong number of arguments), 74 if the source file can't be read.

mod engine;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lox_vm::InterpretError;
use tracing_subscriber::EnvFilter;

/// clap owns `-h`/`--version`/`--trace`; the lone positional is collected
/// as a `Vec` rather than an `Option<PathBuf>` so a *wrong* argument count
/// (two or more paths) can be rejected with the exact usage message and
/// exit code the reference driver specifies, instead of clap's own.
#[derive(Parser)]
#[command(name = "lox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bytecode compiler and virtual machine for Lox", long_about = None)]
struct Args {
    /// Source file to run. Omit to start the REPL.
    path: Vec<PathBuf>,

    /// Log compile/run phase timing to stderr.
    #[arg(short = 'v', long = "trace")]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lox=trace")))
            .with_writer(std::io::stderr)
            .init();
    }

    match args.path.as_slice() {
        [] => {
            repl::run();
            ExitCode::SUCCESS
        }
        [path] => run_file(path),
        _ => {
            eprintln!("Usage: lox [path]");
            ExitCode::from(64)
        }
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}", path.display());
            return ExitCode::from(74);
        }
    };

    let mut engine = engine::Engine::new();
    match engine.run(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(_)) => ExitCode::from(65),
        Err(InterpretError::Runtime(_)) => ExitCode::from(70),
    }
}
