// File: src/errors.rs
//
// Process-level error reporting for the Kestrel driver: the mapping
// from interpreter outcomes to exit codes, and colored headers for the
// errors raised outside the interpreter itself.

use colored::Colorize;

use crate::vm::InterpretStatus;

/// Command line usage error.
pub const EX_USAGE: i32 = 64;
/// Source failed to compile.
pub const EX_DATAERR: i32 = 65;
/// The program raised a runtime error.
pub const EX_SOFTWARE: i32 = 70;
/// A file could not be read.
pub const EX_IOERR: i32 = 74;

pub fn exit_code(status: InterpretStatus) -> i32 {
    match status {
        InterpretStatus::Ok => 0,
        InterpretStatus::CompileError => EX_DATAERR,
        InterpretStatus::RuntimeError => EX_SOFTWARE,
    }
}

pub fn report_io_error(path: &str, message: &str) {
    eprintln!("{} could not read '{}': {}", "Error:".red().bold(), path, message);
}
