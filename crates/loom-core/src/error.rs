//! Diagnostic error taxonomy shared by the compiler and VM.
//!
//! One `thiserror` variant per failure class, with `#[from]` where a
//! lower layer's error wraps cleanly.

use thiserror::Error;

/// A single compile-time or run-time fault, always pinned to the source
/// line that produced it.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum Error {
    #[error("compiler bug at line {line}: {message}")]
    CompilerBug { line: u32, message: String },

    #[error("syntax error at line {line}: {message}")]
    SyntaxError { line: u32, message: String },

    #[error("variable '{name}' is already declared in this scope at line {line}")]
    VariableAlreadyDeclaredInScope { name: String, line: u32 },

    #[error("variable '{name}' is not declared at line {line}")]
    VariableNotDeclared { name: String, line: u32 },

    #[error("variable '{name}' is already declared at line {line}")]
    VariableAlreadyDeclared { name: String, line: u32 },

    #[error("cannot {context} {actual} at line {line}, expected {expected}")]
    InvalidType { expected: String, actual: String, context: String, line: u32 },

    #[error("division by zero at line {line}")]
    DivisionByZero { line: u32 },

    #[error("index out of range at line {line}")]
    IndexError { line: u32 },

    #[error("invalid format at line {line}: {message}")]
    InvalidFormat { line: u32, message: String },

    #[error("function '{name}' expects {expected} argument(s), got {actual} at line {line}")]
    FunctionArgumentNumberMismatch { name: String, expected: usize, actual: usize, line: u32 },

    #[error("native function '{name}' expects {expected} argument(s), got {actual} at line {line}")]
    NativeFunctionArgumentNumberMismatch { name: String, expected: usize, actual: usize, line: u32 },
}

impl Error {
    pub fn line(&self) -> u32 {
        match self {
            Error::CompilerBug { line, .. }
            | Error::SyntaxError { line, .. }
            | Error::VariableAlreadyDeclaredInScope { line, .. }
            | Error::VariableNotDeclared { line, .. }
            | Error::VariableAlreadyDeclared { line, .. }
            | Error::InvalidType { line, .. }
            | Error::DivisionByZero { line }
            | Error::IndexError { line }
            | Error::InvalidFormat { line, .. }
            | Error::FunctionArgumentNumberMismatch { line, .. }
            | Error::NativeFunctionArgumentNumberMismatch { line, .. } => *line,
        }
    }

    pub fn invalid_type(expected: impl Into<String>, actual: impl Into<String>, context: impl Into<String>, line: u32) -> Self {
        Error::InvalidType { expected: expected.into(), actual: actual.into(), context: context.into(), line }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_diagnostic_style() {
        let err = Error::DivisionByZero { line: 12 };
        assert_eq!(err.to_string(), "division by zero at line 12");
    }

    #[test]
    fn line_accessor_covers_every_variant() {
        let err = Error::invalid_type("Number", "String", "add", 3);
        assert_eq!(err.line(), 3);
    }
}
