// File: src/main.rs
//
// Entry point for the Kestrel interpreter. With a file argument the
// script is executed; without one an interactive REPL starts. Exit
// codes: 0 success, 64 usage, 65 compile error, 70 runtime error, 74
// unreadable file.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser as ClapParser;

use kestrel::errors;
use kestrel::repl::Repl;
use kestrel::vm::Vm;

#[derive(ClapParser)]
#[command(
    name = "kestrel",
    about = "Kestrel: a dynamically-typed scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Script to execute; omit to start the REPL.
    file: Option<PathBuf>,

    /// Dump compiled bytecode before running.
    #[arg(long)]
    disassemble: bool,

    /// Trace every executed instruction with the value stack.
    #[arg(long)]
    trace: bool,

    /// Run a full garbage collection on every allocation.
    #[arg(long)]
    gc_stress: bool,
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => errors::EX_USAGE,
            };
            let _ = error.print();
            process::exit(code);
        }
    };

    match cli.file {
        Some(path) => {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(error) => {
                    errors::report_io_error(&path.to_string_lossy(), &error.to_string());
                    process::exit(errors::EX_IOERR);
                }
            };

            let mut vm = Vm::new();
            vm.disassemble = cli.disassemble;
            vm.trace = cli.trace;
            vm.set_gc_stress(cli.gc_stress);

            let status = vm.interpret(&source);
            process::exit(errors::exit_code(status));
        }
        None => match Repl::new() {
            Ok(mut repl) => {
                if let Err(error) = repl.run() {
                    eprintln!("REPL error: {}", error);
                    process::exit(1);
                }
            }
            Err(error) => {
                eprintln!("Failed to start REPL: {}", error);
                process::exit(1);
            }
        },
    }
}
