//! Thin bridge between the CLI driver and [`lox_vm::Vm`].
//!
//! Keeps one [`Vm`] alive across an entire REPL session (so globals and the
//! string pool persist from line to line) while giving the file-mode path a
//! fresh one per run. Every compile/run pass is wrapped in a `tracing` span
//! so `-v` gets phase timing without touching the plain-text stdout/stderr
//! contract the interpreter itself is held to.

use lox_vm::{InterpretError, Vm};

/// Owns the interpreter state across one or more [`Engine::run`] calls.
pub struct Engine {
    vm: Vm,
}

impl Engine {
    pub fn new() -> Self {
        Engine { vm: Vm::new() }
    }

    /// Compiles and runs one chunk of source against this engine's `Vm`.
    /// Diagnostics are already printed to stderr by the time this returns;
    /// the caller only needs the outcome to pick an exit code.
    pub fn run(&mut self, source: &str) -> Result<(), InterpretError> {
        let span = tracing::info_span!("interpret");
        let _enter = span.enter();
        let start = std::time::Instant::now();
        let result = self.vm.interpret(source);
        tracing::trace!(elapsed = ?start.elapsed(), "interpret finished");
        match &result {
            Ok(()) => {}
            Err(InterpretError::Compile(errors)) => {
                for error in errors {
                    eprintln!("{error}");
                }
            }
            Err(InterpretError::Runtime(_)) => {
                // vm::Vm already printed the message and stack trace.
            }
        }
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
