//! Compile-time diagnostics.
//!
//! `loom_core::Error` covers the value/program layer; this enum covers
//! lexing, parsing, and codegen, with a `From` impl bridging the two at
//! the crate boundary.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CompileError {
    #[error("syntax error at line {line}: {message}")]
    SyntaxError { line: u32, message: String },

    #[error("variable '{name}' is already declared in this scope at line {line}")]
    VariableAlreadyDeclaredInScope { name: String, line: u32 },

    #[error("compiler bug at line {line}: {message}")]
    CompilerBug { line: u32, message: String },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::SyntaxError { line, .. }
            | CompileError::VariableAlreadyDeclaredInScope { line, .. }
            | CompileError::CompilerBug { line, .. } => *line,
        }
    }
}

impl From<CompileError> for loom_core::Error {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::SyntaxError { line, message } => loom_core::Error::SyntaxError { line, message },
            CompileError::VariableAlreadyDeclaredInScope { name, line } => {
                loom_core::Error::VariableAlreadyDeclaredInScope { name, line }
            }
            CompileError::CompilerBug { line, message } => loom_core::Error::CompilerBug { line, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
