//! Suspend/resume serializer: the opaque snapshot contract that lets a
//! VM cross a process boundary mid-execution.
//!
//! Encoding is bincode (fixed-width integers, little-endian) with the
//! whole payload additionally base64-wrapped so the `state` field is a
//! plain string a host can log, store in a database column, or pass over
//! a text-only transport.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use loom_core::Value;

use crate::registry::{NativeRegistry, SyscallRegistry};
use crate::vm::{RunOutcome, SyscallTrap, Vm, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Halted,
    Error,
    Syscall,
}

/// The stable external artifact. `state` is opaque to callers; only this
/// crate's serializer understands its contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: String,
    pub status: Status,
    pub syscall: Option<SyscallTrap>,
    pub halted_value: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    vm: VmState,
    pending_syscall: Option<SyscallTrap>,
}

#[derive(Debug)]
pub enum SnapshotError {
    Bincode(bincode::Error),
    Base64(base64::DecodeError),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Bincode(e) => write!(f, "bincode: {e}"),
            SnapshotError::Base64(e) => write!(f, "base64: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Serialize a VM plus the outcome of its last `run()` call into the
/// external snapshot format.
pub fn serialize(vm: &Vm, outcome: &RunOutcome) -> Result<Snapshot, SnapshotError> {
    let payload = Payload { vm: vm.state().clone(), pending_syscall: vm.pending_syscall().cloned() };
    let bytes = bincode::serialize(&payload).map_err(SnapshotError::Bincode)?;
    let state = BASE64.encode(bytes);

    let (status, syscall, halted_value, error) = match outcome {
        RunOutcome::Running => (Status::Running, None, None, None),
        RunOutcome::Halted(v) => (Status::Halted, None, Some(v.clone()), None),
        RunOutcome::Error(e) => (Status::Error, None, None, Some(e.to_string())),
        RunOutcome::Syscall(trap) => (Status::Syscall, Some(trap.clone()), None, None),
    };

    Ok(Snapshot { state, status, syscall, halted_value, error })
}

/// Reconstruct a VM from a snapshot's opaque `state`, re-supplying host
/// registries and (if resuming a syscall trap) pushing `resume_value`
/// onto the innermost frame's operand stack before clearing the trap.
pub fn deserialize(
    snapshot: &Snapshot,
    natives: NativeRegistry,
    syscalls: SyscallRegistry,
    resume_value: Option<Value>,
) -> Result<Vm, SnapshotError> {
    let bytes = BASE64.decode(&snapshot.state).map_err(SnapshotError::Base64)?;
    let payload: Payload = bincode::deserialize(&bytes).map_err(SnapshotError::Bincode)?;
    let resume_value = if payload.pending_syscall.is_some() { resume_value } else { None };
    Ok(Vm::from_state(payload.vm, natives, syscalls, resume_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_compiler::compile;

    #[test]
    fn round_trip_preserves_a_running_vm() {
        let program = compile("let a = 1 + 2; syscall(\"r\", a);").unwrap();
        let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
        let outcome = vm.run(None);
        let snapshot = serialize(&vm, &outcome).unwrap();
        assert_eq!(snapshot.status, Status::Syscall);

        let mut resumed = deserialize(&snapshot, NativeRegistry::stdlib(), SyscallRegistry::with_generic(), Some(Value::Number(99.0))).unwrap();
        assert!(resumed.pending_syscall().is_none());
        let second = resumed.run(None);
        assert!(matches!(second, RunOutcome::Halted(_)));
    }

    #[test]
    fn snapshot_state_survives_base64_round_trip() {
        let program = compile("let a = 1;").unwrap();
        let vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
        let snapshot = serialize(&vm, &RunOutcome::Running).unwrap();
        assert!(base64::engine::general_purpose::STANDARD.decode(&snapshot.state).is_ok());
    }
}
