//! Single-pass compiler: character stream straight to bytecode, no AST
//! in between.
//!
//! # Modules
//!
//! - `scanner`: character stream to token stream.
//! - `compiler`: Pratt-parsing compiler that emits directly into a
//!   [`lox_core::Chunk`] as it recognizes each grammar rule.
//! - `error`: the `CompileError` diagnostic type.

pub mod compiler;
pub mod error;
pub mod scanner;

pub use compiler::compile;
pub use error::CompileError;
pub use scanner::{Scanner, Token, TokenKind};
