//! loom-vm — stack-based bytecode VM with a suspend/resume host protocol.
//!
//! Knows exactly one instruction set (`loom_core::OpCode`); opcodes never
//! change at runtime, so `vm::Vm::execute` is a single closed `match`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod error;
pub mod frame;
pub mod registry;
pub mod serializer;
pub mod vm;

pub use error::VmError;
pub use frame::CallFrame;
pub use registry::{Arity, NativeEntry, NativeImpl, NativeRegistry, SyscallEntry, SyscallPreprocessor, SyscallRegistry};
pub use serializer::{deserialize, serialize, Snapshot, SnapshotError, Status};
pub use vm::{RunOutcome, SyscallTrap, Vm, VmState};
