//! Program container: an instruction stream plus its constant pool.
//!
//! Wire format carries a magic header and a version so a host can reject
//! a snapshot or compiled artifact from an incompatible build before
//! touching its contents. The constant pool holds full `Value`s, not a
//! narrower constant-only type, since functions and syscalls live in it
//! too.

use std::fmt::{self, Write as _};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::op::Instruction;
use crate::value::Value;

/// Format version. Bump when `Program`'s serialized shape changes.
pub const PROGRAM_VERSION: u16 = 1;
pub const PROGRAM_MAGIC: [u8; 4] = *b"LOOM";

/// Append-only, index-addressed table of constants. Strings are deduped
/// (interned); every other value is pushed as a fresh slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstPool {
    values: Vec<Value>,
    #[serde(skip)]
    str_index: AHashMap<String, u32>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self { values: Vec::new(), str_index: AHashMap::new() }
    }

    /// Append a value, returning its index. Strings already present are
    /// deduped to their existing index; existing indices never change
    /// meaning (append-only).
    pub fn add(&mut self, value: Value) -> u32 {
        if let Value::String(s) = &value {
            if let Some(&idx) = self.str_index.get(s) {
                return idx;
            }
            let idx = self.push_raw(value.clone());
            self.str_index.insert(s.clone(), idx);
            return idx;
        }
        self.push_raw(value)
    }

    fn push_raw(&mut self, value: Value) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(value);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&Value> {
        self.values.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.values.iter().enumerate().map(|(i, v)| (i as u32, v))
    }

    fn rebuild_string_index(&mut self) {
        self.str_index.clear();
        for (i, v) in self.values.iter().enumerate() {
            if let Value::String(s) = v {
                self.str_index.insert(s.clone(), i as u32);
            }
        }
    }
}

/// Instruction stream + constant pool. Built by the compiler, consumed
/// read-only by the VM; immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub text: Vec<Instruction>,
    pub data: ConstPool,
    /// Module paths named by `import` statements, in source order. The
    /// compiler never resolves these; a host-side loader decides what an
    /// import means and acts on this list before running the program.
    #[serde(default)]
    pub imports: Vec<String>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Self { text: Vec::new(), data: ConstPool::new(), imports: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProgramError> {
        #[derive(Serialize)]
        struct OnWire<'a> {
            magic: [u8; 4],
            version: u16,
            program: &'a Program,
        }
        bincode::serialize(&OnWire { magic: PROGRAM_MAGIC, version: PROGRAM_VERSION, program: self })
            .map_err(ProgramError::Bincode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        #[derive(Deserialize)]
        struct OnWire {
            magic: [u8; 4],
            version: u16,
            program: Program,
        }
        let wire: OnWire = bincode::deserialize(bytes).map_err(ProgramError::Bincode)?;
        if wire.magic != PROGRAM_MAGIC {
            return Err(ProgramError::BadMagic(wire.magic));
        }
        if wire.version != PROGRAM_VERSION {
            return Err(ProgramError::BadVersion { expected: PROGRAM_VERSION, found: wire.version });
        }
        let mut program = wire.program;
        program.data.rebuild_string_index();
        Ok(program)
    }

    /// Human-readable disassembly: `pc  (line N)  MNEMONIC operand  ; constant`.
    pub fn disassemble(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(&mut out, "== {title} ==");
        let _ = writeln!(&mut out, "consts={} instructions={} imports={}", self.data.len(), self.text.len(), self.imports.len());

        if !self.imports.is_empty() {
            let _ = writeln!(&mut out, "\n# imports");
            for path in &self.imports {
                let _ = writeln!(&mut out, "  {path}");
            }
        }

        if !self.data.is_empty() {
            let _ = writeln!(&mut out, "\n# constants");
            for (i, v) in self.data.iter() {
                let _ = writeln!(&mut out, "  [{i}] = {}", v.repr());
            }
        }

        let _ = writeln!(&mut out, "\n# code");
        for (pc, instr) in self.text.iter().enumerate() {
            let mut line = format!("{pc:05}  (line {:>4})  {instr}", instr.line);
            if matches!(instr.op, crate::op::OpCode::Data | crate::op::OpCode::Push | crate::op::OpCode::LoadGl | crate::op::OpCode::DeclareGl | crate::op::OpCode::SetGl) {
                if let Some(operand) = instr.operand {
                    if let Some(value) = self.data.get(operand as u32) {
                        let _ = write!(line, "  ; {}", value.repr());
                    }
                }
            }
            let _ = writeln!(&mut out, "{line}");
        }

        out
    }
}

#[derive(Debug)]
pub enum ProgramError {
    Bincode(bincode::Error),
    BadMagic([u8; 4]),
    BadVersion { expected: u16, found: u16 },
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::Bincode(e) => write!(f, "bincode: {e}"),
            ProgramError::BadMagic(m) => write!(f, "bad magic: {m:?}"),
            ProgramError::BadVersion { expected, found } => {
                write!(f, "bad version: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for ProgramError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpCode;

    #[test]
    fn const_pool_dedupes_strings_but_not_other_values() {
        let mut pool = ConstPool::new();
        let a = pool.add(Value::String("x".into()));
        let b = pool.add(Value::String("x".into()));
        let c = pool.add(Value::Number(1.0));
        let d = pool.add(Value::Number(1.0));
        assert_eq!(a, b);
        assert_ne!(c, d, "non-string constants are never deduped");
    }

    #[test]
    fn program_roundtrips_through_bytes() {
        let mut program = Program::new();
        let k = program.data.add(Value::String("hello".into()));
        program.text.push(Instruction::with_operand(OpCode::Data, k as i64, 1));
        program.text.push(Instruction::bare(OpCode::Ret, 1));

        let bytes = program.to_bytes().unwrap();
        let loaded = Program::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.text.len(), 2);
        assert_eq!(loaded.data.len(), 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Program::new().to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(Program::from_bytes(&bytes).is_err());
    }
}
