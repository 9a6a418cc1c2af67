//! Lox Core: the bytecode chunk, value model, and string pool shared by
//! the compiler and the virtual machine.
//!
//! # Modules
//!
//! - `chunk`: the bytecode container — byte stream, line table, constant
//!   pool.
//! - `value`: the tagged `Value` universe and every heap object variant
//!   (string, function, closure, upvalue, class, instance, bound method,
//!   native).
//! - `table`: the open-addressed hash table used for globals, fields,
//!   method tables, and the string pool.
//! - `strings`: the FNV-1a string interner built on top of `table`.

pub mod chunk;
pub mod strings;
pub mod table;
pub mod value;

pub use chunk::{Chunk, OpCode, MAX_CONSTANTS};
pub use strings::{fnv1a, Interner};
pub use table::Table;
pub use value::{
    BoundMethod, Class, Closure, Instance, LoxFunction, LoxStr, NativeFn, Object, Upvalue,
    UpvalueState, Value,
};
