//! loom-core — value model, instruction set, and program container shared
//! by the compiler and the VM.
//!
//! Has no knowledge of lexing/parsing or of execution; it only defines the
//! data both sides agree on.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod error;
pub mod op;
pub mod program;
pub mod value;

pub use error::{Error, Result};
pub use op::{Instruction, OpCode};
pub use program::{ConstPool, Program, ProgramError};
pub use value::{FunctionDef, ListHandle, Value};

/// Crate version, exposed so the CLI/disassembler can stamp it into output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::op::{Instruction, OpCode};
    pub use crate::program::{ConstPool, Program};
    pub use crate::value::{FunctionDef, Value};
}
