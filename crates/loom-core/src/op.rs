//! Opcode enumeration and instruction encoding.
//!
//! A plain enum with one optional immediate operand, a `Display`/mnemonic
//! pair for disassembly, and helpers the compiler/VM both lean on
//! (`is_jump`, `jump_target`).
//!
//! Compat note: this enum is serialized via bincode inside `Program`. Add
//! new variants at the bottom; don't reorder existing ones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One bytecode operation. Exactly one optional integer operand; many
/// opcodes ignore it. The meaning of the operand (constant-pool index,
/// jump target, stack-slot index, argument count, flag) depends on the
/// opcode — see each variant's doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Push `data[k]`.
    Data,
    /// Alias of `Data`: push `data[k]`. Kept distinct from `Data` because
    /// the source language's compiler emits both names for historical
    /// reasons (literal push vs. pushing a pre-declared constant).
    Push,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,

    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
    And,
    Or,
    Not,

    /// Unconditional jump to instruction index `t`.
    Jump,
    /// Pop; jump to `t` if falsy.
    JumpF,
    /// Pop; jump to `t` if truthy.
    JumpT,

    /// Push a copy of `stack[i]` in the current frame.
    Load,
    /// Write top-of-stack to `stack[i]` without popping.
    Store,

    /// Pop; bind `data[k]` name to the popped value as a new global.
    DeclareGl,
    /// Push the value of the named global.
    LoadGl,
    /// Write top-of-stack to the named global without popping.
    SetGl,

    /// Pop `n` elements; push an immutable `Tuple` preserving source order.
    MakeTuple,
    /// Pop `n` elements; push a `List` preserving source order.
    MakeList,

    /// Pop key then container; push `container[key]`.
    Subscript,
    /// Pop key, container, value; write `container[key] = value`; push value.
    StoreSubscript,

    /// Pop `n` args then the callee; dispatch per callee's tag.
    Call,
    /// Pop the frame. Operand `1` carries the frame's top of stack to the
    /// caller; `0` pushes `Null` to the caller instead.
    Ret,

    Pop,
    Copy,
    Nop,
}

impl OpCode {
    pub fn mnemonic(self) -> &'static str {
        use OpCode::*;
        match self {
            Data => "DATA",
            Push => "PUSH",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Neg => "NEG",
            Inc => "INC",
            Dec => "DEC",
            Lt => "LT",
            Gt => "GT",
            Lte => "LTE",
            Gte => "GTE",
            Eq => "EQ",
            Neq => "NEQ",
            And => "AND",
            Or => "OR",
            Not => "NOT",
            Jump => "JUMP",
            JumpF => "JUMPF",
            JumpT => "JUMPT",
            Load => "LOAD",
            Store => "STORE",
            DeclareGl => "DECLAREGL",
            LoadGl => "LOADGL",
            SetGl => "SETGL",
            MakeTuple => "MAKE_TUPLE",
            MakeList => "MAKE_LIST",
            Subscript => "SUBSCRIPT",
            StoreSubscript => "STORE_SUBSCRIPT",
            Call => "CALL",
            Ret => "RET",
            Pop => "POP",
            Copy => "COPY",
            Nop => "NOP",
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jump | OpCode::JumpF | OpCode::JumpT)
    }
}

/// `(opcode, optional integer operand, source line number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Option<i64>,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: OpCode, operand: Option<i64>, line: u32) -> Self {
        Self { op, operand, line }
    }

    pub fn bare(op: OpCode, line: u32) -> Self {
        Self { op, operand: None, line }
    }

    pub fn with_operand(op: OpCode, operand: i64, line: u32) -> Self {
        Self { op, operand: Some(operand), line }
    }

    /// The jump target this instruction encodes, if it's a jump opcode.
    pub fn jump_target(&self) -> Option<usize> {
        if self.op.is_jump() {
            self.operand.map(|t| t.max(0) as usize)
        } else {
            None
        }
    }

    /// Overwrite a jump instruction's target in place (used for backpatching
    /// forward jumps once the compiler knows `len(text)`).
    pub fn patch_target(&mut self, target: usize) {
        debug_assert!(self.op.is_jump(), "patch_target on a non-jump instruction");
        self.operand = Some(target as i64);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Some(operand) => write!(f, "{} {}", self.op.mnemonic(), operand),
            None => write!(f, "{}", self.op.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(OpCode::Add.mnemonic(), "ADD");
        assert_eq!(OpCode::JumpF.mnemonic(), "JUMPF");
        assert_eq!(OpCode::MakeTuple.mnemonic(), "MAKE_TUPLE");
    }

    #[test]
    fn jump_detection() {
        assert!(OpCode::Jump.is_jump());
        assert!(OpCode::JumpF.is_jump());
        assert!(!OpCode::Call.is_jump());
    }

    #[test]
    fn patch_target_updates_operand() {
        let mut instr = Instruction::with_operand(OpCode::JumpF, 0, 1);
        instr.patch_target(42);
        assert_eq!(instr.jump_target(), Some(42));
    }

    #[test]
    fn display_formats_mnemonic_and_operand() {
        assert_eq!(Instruction::with_operand(OpCode::Load, 2, 1).to_string(), "LOAD 2");
        assert_eq!(Instruction::bare(OpCode::Nop, 1).to_string(), "NOP");
    }
}
