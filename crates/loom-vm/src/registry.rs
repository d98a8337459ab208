//! Host registration surfaces for native functions and syscalls.
//!
//! Kept as plain injectable structs built at VM construction, per the
//! design note that these are configuration, not hidden singletons — a
//! host supplies its own registry rather than the VM reaching for a
//! process-wide default.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::rc::Rc;

use loom_core::Value;

use crate::error::VmError;

pub type NativeImpl = Rc<dyn Fn(u32, &[Value]) -> Result<Value, VmError>>;

/// How many arguments a native accepts. Most natives take an exact count;
/// `exit` is the one variadic-ish case (an optional value), so this is a
/// range rather than a bare `usize`.
#[derive(Clone)]
pub struct Arity(RangeInclusive<usize>);

impl Arity {
    pub fn contains(&self, n: usize) -> bool {
        self.0.contains(&n)
    }

    /// Lower bound, reported as "expected" when a call fails the check.
    pub fn min(&self) -> usize {
        *self.0.start()
    }
}

impl From<usize> for Arity {
    fn from(n: usize) -> Self {
        Arity(n..=n)
    }
}

impl From<RangeInclusive<usize>> for Arity {
    fn from(r: RangeInclusive<usize>) -> Self {
        Arity(r)
    }
}

#[derive(Clone)]
pub struct NativeEntry {
    pub arity: Arity,
    pub implementation: NativeImpl,
}

/// Every name registered here becomes a `Value::Native` global at VM
/// construction. Bodies are host-supplied; `stdlib()` below is a minimal
/// demonstration set, not a native-function implementation library.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: HashMap<String, NativeEntry>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, arity: impl Into<Arity>, implementation: NativeImpl) {
        self.entries.insert(name.into(), NativeEntry { arity: arity.into(), implementation });
    }

    pub fn get(&self, name: &str) -> Option<&NativeEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// A minimal working implementation of the required native surface
    /// (`print`, `input`, `number`, `str`, `len`, `random`, `exit`, `tts`,
    /// `stt`, `alert`, `choose`), enough to drive the demo CLI and tests.
    /// Real hosts are expected to supply their own bodies.
    pub fn stdlib() -> Self {
        let mut reg = Self::new();

        reg.register("print", 1, Rc::new(|_line, args| {
            println!("{}", args[0]);
            Ok(Value::Null)
        }));

        // The VM special-cases a call to "input" in `op_call` to suspend
        // with a syscall trap named "input" rather than invoking this
        // body, so a host can supply the value asynchronously instead of
        // the VM blocking on stdin. This implementation only runs if a
        // host ever invokes it through `NativeEntry` directly.
        reg.register("input", 0, Rc::new(|_line, _args| {
            use std::io::BufRead;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok();
            Ok(Value::String(line.trim_end_matches(['\n', '\r']).to_string()))
        }));

        reg.register("number", 1, Rc::new(|line, args| match &args[0] {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| VmError::Core(loom_core::Error::InvalidFormat { line, message: format!("'{s}' is not a number") })),
            Value::Number(n) => Ok(Value::Number(*n)),
            other => Err(VmError::invalid_type("String or Number", other.type_name(), "number()", line)),
        }));

        reg.register("str", 1, Rc::new(|_line, args| Ok(Value::String(args[0].to_string()))));

        reg.register("len", 1, Rc::new(|line, args| match &args[0] {
            Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
            Value::Tuple(items) => Ok(Value::Number(items.len() as f64)),
            Value::List(items) => Ok(Value::Number(items.borrow().len() as f64)),
            other => Err(VmError::invalid_type("String, Tuple, or List", other.type_name(), "len()", line)),
        }));

        reg.register("random", 0, Rc::new(|_line, _args| Ok(Value::Number(rand::random::<f64>()))));

        // The VM special-cases a call to "exit" in `op_call` to halt with
        // this value rather than pushing it and continuing; the body here
        // only runs if a host ever invokes it through `NativeEntry`
        // directly, bypassing that special case.
        reg.register("exit", 0..=1, Rc::new(|_line, args| Ok(args.first().cloned().unwrap_or(Value::Null))));

        for name in ["tts", "stt", "alert", "choose"] {
            reg.register(name, 1, Rc::new(move |_line, _args| {
                log::warn!("native '{name}' has no host-supplied implementation; returning null");
                Ok(Value::Null)
            }));
        }

        reg
    }
}

pub type SyscallPreprocessor = Rc<dyn Fn(&[Value], u32) -> Result<Vec<Value>, VmError>>;

#[derive(Clone)]
pub struct SyscallEntry {
    pub syscall_id: String,
    pub preprocessor: SyscallPreprocessor,
}

/// Every name registered here becomes a `Value::Syscall` global at VM
/// construction. The generic `"syscall"` name enables dynamic dispatch:
/// its first (preprocessed) argument becomes the trapped syscall name.
#[derive(Clone, Default)]
pub struct SyscallRegistry {
    entries: HashMap<String, SyscallEntry>,
}

impl SyscallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, syscall_id: impl Into<String>, preprocessor: SyscallPreprocessor) {
        self.entries.insert(name.into(), SyscallEntry { syscall_id: syscall_id.into(), preprocessor });
    }

    pub fn get(&self, name: &str) -> Option<&SyscallEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn identity() -> SyscallPreprocessor {
        Rc::new(|args, _line| Ok(args.to_vec()))
    }

    /// Registers the generic dynamic-dispatch `"syscall"` name plus any
    /// named syscalls a host wants available by default. Tests and the
    /// demo CLI use this to exercise the §4.1 generic-dispatch case.
    pub fn with_generic() -> Self {
        let mut reg = Self::new();
        reg.register("syscall", "syscall", Self::identity());
        reg
    }

    pub fn register_passthrough(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.register(name.clone(), name, Self::identity());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdlib_registers_every_required_native() {
        let reg = NativeRegistry::stdlib();
        for name in ["print", "input", "number", "str", "len", "random", "exit", "tts", "stt", "alert", "choose"] {
            assert!(reg.get(name).is_some(), "missing native '{name}'");
        }
    }

    #[test]
    fn generic_syscall_name_is_registered() {
        let reg = SyscallRegistry::with_generic();
        assert!(reg.get("syscall").is_some());
    }

    #[test]
    fn exit_accepts_zero_or_one_argument() {
        let reg = NativeRegistry::stdlib();
        let arity = &reg.get("exit").unwrap().arity;
        assert!(arity.contains(0));
        assert!(arity.contains(1));
        assert!(!arity.contains(2));
    }
}
