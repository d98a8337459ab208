//! Runtime error taxonomy. Extends `loom_core::Error` (the shared
//! diagnostic kinds) with the two purely VM-side conditions: calling a
//! name that was never registered in either host registry.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum VmError {
    #[error(transparent)]
    Core(#[from] loom_core::Error),

    #[error("unknown native function '{name}' at line {line}")]
    UnknownNative { name: String, line: u32 },

    #[error("unknown syscall '{name}' at line {line}")]
    UnknownSyscall { name: String, line: u32 },
}

impl VmError {
    pub fn line(&self) -> u32 {
        match self {
            VmError::Core(e) => e.line(),
            VmError::UnknownNative { line, .. } | VmError::UnknownSyscall { line, .. } => *line,
        }
    }

    pub fn invalid_type(expected: impl Into<String>, actual: impl Into<String>, context: impl Into<String>, line: u32) -> Self {
        VmError::Core(loom_core::Error::invalid_type(expected, actual, context, line))
    }
}

pub type Result<T> = std::result::Result<T, VmError>;
