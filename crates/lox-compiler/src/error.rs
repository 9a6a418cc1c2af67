//! Compile-time diagnostics.
//!
//! No `thiserror` here, matching the rest of this corpus's compiler-shaped
//! crates: a plain enum-free struct with a hand-written `Display`.

use std::fmt;

/// One reported diagnostic: `[line L, column C] Error at 'lexeme': message`,
/// `at end` when the offending token was `EOF`, or — when the token itself
/// is a scanner error token, so there is no lexeme worth quoting — plain
/// `[line L, column C] Error: message` with no `at` clause at all.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub column: u32,
    pub at: String,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}, column {}] Error", self.line, self.column)?;
        if !self.at.is_empty() {
            write!(f, " {}", self.at)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for CompileError {}
