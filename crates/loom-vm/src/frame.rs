//! Call frame: one activation record, with its own operand stack and
//! instruction pointer.

use serde::{Deserialize, Serialize};

use loom_core::{Instruction, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    pub ip: usize,
    pub stack: Vec<Value>,
    pub text: Vec<Instruction>,
}

impl CallFrame {
    pub fn root(text: Vec<Instruction>) -> Self {
        Self { ip: 0, stack: Vec::new(), text }
    }

    pub fn call(text: Vec<Instruction>, stack: Vec<Value>) -> Self {
        Self { ip: 0, stack, text }
    }

    pub fn fetch(&self) -> Option<Instruction> {
        self.text.get(self.ip).copied()
    }
}
