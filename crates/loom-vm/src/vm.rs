//! Fetch/decode/execute loop, call frames, globals, and the syscall trap.
//!
//! The instruction set is closed and known at compile time, so dispatch
//! is one flat match in `execute` rather than a trait-object table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use loom_core::{Instruction, OpCode, Program, Value};

use crate::error::VmError;
use crate::frame::CallFrame;
use crate::registry::{NativeRegistry, SyscallRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyscallTrap {
    pub name: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Running,
    Halted(Value),
    Error(VmError),
    Syscall(SyscallTrap),
}

/// The full, serializable machine state. `natives`/`syscalls` are
/// deliberately excluded — they are host configuration re-supplied at
/// `Vm::new`/`Vm::from_state`, not data that travels in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmState {
    pub data: loom_core::ConstPool,
    pub frames: Vec<CallFrame>,
    pub globals: HashMap<String, Value>,
}

pub struct Vm {
    pub(crate) state: VmState,
    pub(crate) pending_syscall: Option<SyscallTrap>,
    natives: NativeRegistry,
    syscalls: SyscallRegistry,
}

impl Vm {
    /// Construct a VM from a freshly compiled program. Globals are
    /// pre-populated with a binding for every native and syscall name in
    /// the supplied registries.
    pub fn new(program: Program, natives: NativeRegistry, syscalls: SyscallRegistry) -> Self {
        let mut globals = HashMap::new();
        for name in natives.names() {
            globals.insert(name.to_string(), Value::Native(name.to_string()));
        }
        for name in syscalls.names() {
            globals.insert(name.to_string(), Value::Syscall(name.to_string()));
        }

        let root = CallFrame::root(program.text);
        Self {
            state: VmState { data: program.data, frames: vec![root], globals },
            pending_syscall: None,
            natives,
            syscalls,
        }
    }

    /// Rebuild a VM from a previously captured state, re-supplying the
    /// host registries (they never travel in the snapshot) and pushing a
    /// pending syscall's return value onto the innermost frame, per the
    /// resumption contract.
    pub fn from_state(state: VmState, natives: NativeRegistry, syscalls: SyscallRegistry, resume_value: Option<Value>) -> Self {
        let mut vm = Self { state, pending_syscall: None, natives, syscalls };
        if let Some(value) = resume_value {
            if let Some(frame) = vm.state.frames.last_mut() {
                frame.stack.push(value);
            }
        }
        vm
    }

    pub fn state(&self) -> &VmState {
        &self.state
    }

    pub fn pending_syscall(&self) -> Option<&SyscallTrap> {
        self.pending_syscall.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.state.frames.is_empty()
    }

    /// Run until `steps` instructions have executed (or forever if
    /// `None`), the machine halts, a syscall traps, or an error occurs.
    pub fn run(&mut self, steps: Option<u64>) -> RunOutcome {
        let mut remaining = steps;
        loop {
            if self.state.frames.is_empty() {
                return RunOutcome::Halted(Value::Null);
            }
            if self.pending_syscall.is_some() {
                return RunOutcome::Syscall(self.pending_syscall.clone().unwrap());
            }
            if let Some(n) = remaining {
                if n == 0 {
                    return RunOutcome::Running;
                }
            }

            match self.step() {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Halted(v)) => return RunOutcome::Halted(v),
                Ok(StepResult::Syscall(trap)) => return RunOutcome::Syscall(trap),
                Err(e) => return RunOutcome::Error(e),
            }

            if let Some(n) = remaining.as_mut() {
                *n -= 1;
            }
        }
    }

    fn step(&mut self) -> Result<StepResult, VmError> {
        let frame_idx = self.state.frames.len() - 1;
        let Some(instr) = self.state.frames[frame_idx].fetch() else {
            return Ok(self.fall_off_end());
        };
        self.state.frames[frame_idx].ip += 1;
        self.execute(instr)
    }

    fn fall_off_end(&mut self) -> StepResult {
        self.state.frames.pop();
        log::trace!("frame popped (fell off end), {} remaining", self.state.frames.len());
        self.return_value_to_caller(Value::Null)
    }

    fn return_value_to_caller(&mut self, value: Value) -> StepResult {
        if let Some(caller) = self.state.frames.last_mut() {
            caller.stack.push(value);
            StepResult::Continue
        } else {
            StepResult::Halted(value)
        }
    }

    fn frame(&mut self) -> &mut CallFrame {
        self.state.frames.last_mut().unwrap()
    }

    fn pop(&mut self, line: u32) -> Result<Value, VmError> {
        self.frame()
            .stack
            .pop()
            .ok_or_else(|| VmError::Core(loom_core::Error::CompilerBug { line, message: "operand stack underflow".into() }))
    }

    fn push(&mut self, v: Value) {
        self.frame().stack.push(v);
    }

    fn peek(&mut self, line: u32) -> Result<Value, VmError> {
        self.frame()
            .stack
            .last()
            .cloned()
            .ok_or_else(|| VmError::Core(loom_core::Error::CompilerBug { line, message: "operand stack underflow".into() }))
    }

    fn const_at(&self, k: i64, line: u32) -> Result<Value, VmError> {
        self.state
            .data
            .get(k as u32)
            .cloned()
            .ok_or_else(|| VmError::Core(loom_core::Error::CompilerBug { line, message: format!("no constant at index {k}") }))
    }

    fn execute(&mut self, instr: Instruction) -> Result<StepResult, VmError> {
        let line = instr.line;
        match instr.op {
            OpCode::Data | OpCode::Push => {
                let k = instr.operand.unwrap_or(0);
                let v = self.const_at(k, line)?;
                self.push(v);
            }

            OpCode::Add => self.op_add(instr, line)?,
            OpCode::Sub => self.binary_numeric(line, "sub", |a, b| Ok(a - b))?,
            OpCode::Mul => self.binary_numeric(line, "mul", |a, b| Ok(a * b))?,
            OpCode::Div => self.binary_numeric(line, "div", |a, b| if b == 0.0 { Err(()) } else { Ok(a / b) })?,
            OpCode::Mod => self.op_mod(line)?,
            OpCode::Neg => {
                let v = self.pop(line)?;
                match v {
                    Value::Number(n) => self.push(Value::Number(-n)),
                    other => return Err(VmError::invalid_type("Number", other.type_name(), "negate", line)),
                }
            }
            OpCode::Inc => {
                let v = self.pop(line)?;
                match v {
                    Value::Number(n) => self.push(Value::Number(n + 1.0)),
                    other => return Err(VmError::invalid_type("Number", other.type_name(), "increment", line)),
                }
            }
            OpCode::Dec => {
                let v = self.pop(line)?;
                match v {
                    Value::Number(n) => self.push(Value::Number(n - 1.0)),
                    other => return Err(VmError::invalid_type("Number", other.type_name(), "decrement", line)),
                }
            }

            OpCode::Lt => self.compare(line, "compare", |a, b| a < b)?,
            OpCode::Gt => self.compare(line, "compare", |a, b| a > b)?,
            OpCode::Lte => self.compare(line, "compare", |a, b| a <= b)?,
            OpCode::Gte => self.compare(line, "compare", |a, b| a >= b)?,
            OpCode::Eq => {
                let b = self.pop(line)?;
                let a = self.pop(line)?;
                self.push(Value::Boolean(a == b));
            }
            OpCode::Neq => {
                let b = self.pop(line)?;
                let a = self.pop(line)?;
                self.push(Value::Boolean(a != b));
            }
            OpCode::And => self.logic(line, |a, b| a && b)?,
            OpCode::Or => self.logic(line, |a, b| a || b)?,
            OpCode::Not => {
                let v = self.pop(line)?;
                match v {
                    Value::Boolean(b) => self.push(Value::Boolean(!b)),
                    other => return Err(VmError::invalid_type("Boolean", other.type_name(), "not", line)),
                }
            }

            OpCode::Jump => {
                let t = instr.operand.unwrap_or(0) as usize;
                self.frame().ip = t;
            }
            OpCode::JumpF => {
                let cond = self.pop(line)?;
                if !cond.truthy() {
                    self.frame().ip = instr.operand.unwrap_or(0) as usize;
                }
            }
            OpCode::JumpT => {
                let cond = self.pop(line)?;
                if cond.truthy() {
                    self.frame().ip = instr.operand.unwrap_or(0) as usize;
                }
            }

            OpCode::Load => {
                let i = instr.operand.unwrap_or(0) as usize;
                let v = self
                    .frame()
                    .stack
                    .get(i)
                    .cloned()
                    .ok_or_else(|| VmError::Core(loom_core::Error::CompilerBug { line, message: format!("LOAD out of range at slot {i}") }))?;
                self.push(v);
            }
            OpCode::Store => {
                let i = instr.operand.unwrap_or(0) as usize;
                let v = self.peek(line)?;
                let frame = self.frame();
                if i >= frame.stack.len() {
                    return Err(VmError::Core(loom_core::Error::CompilerBug { line, message: format!("STORE out of range at slot {i}") }));
                }
                frame.stack[i] = v;
            }

            OpCode::DeclareGl => {
                let v = self.pop(line)?;
                let name = self.global_name(instr, line)?;
                if self.state.globals.contains_key(&name) {
                    return Err(VmError::Core(loom_core::Error::VariableAlreadyDeclared { name, line }));
                }
                self.state.globals.insert(name, v);
            }
            OpCode::LoadGl => {
                let name = self.global_name(instr, line)?;
                let v = self
                    .state
                    .globals
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| VmError::Core(loom_core::Error::VariableNotDeclared { name: name.clone(), line }))?;
                self.push(v);
            }
            OpCode::SetGl => {
                let name = self.global_name(instr, line)?;
                let v = self.peek(line)?;
                if !self.state.globals.contains_key(&name) {
                    return Err(VmError::Core(loom_core::Error::VariableNotDeclared { name, line }));
                }
                self.state.globals.insert(name, v);
            }

            OpCode::MakeTuple => {
                let n = instr.operand.unwrap_or(0) as usize;
                let items = self.pop_n(n, line)?;
                self.push(Value::tuple(items));
            }
            OpCode::MakeList => {
                let n = instr.operand.unwrap_or(0) as usize;
                let items = self.pop_n(n, line)?;
                self.push(Value::list(items));
            }

            OpCode::Subscript => {
                let key = self.pop(line)?;
                let container = self.pop(line)?;
                let v = self.subscript_read(&container, &key, line)?;
                self.push(v);
            }
            OpCode::StoreSubscript => {
                let key = self.pop(line)?;
                let container = self.pop(line)?;
                let value = self.pop(line)?;
                self.subscript_write(&container, &key, value.clone(), line)?;
                self.push(value);
            }

            OpCode::Call => {
                let n = instr.operand.unwrap_or(0) as usize;
                return self.op_call(n, line);
            }
            OpCode::Ret => {
                let flag = instr.operand.unwrap_or(0);
                let value = if flag == 1 { self.pop(line)? } else { Value::Null };
                self.state.frames.pop();
                log::trace!("frame popped (ret), {} remaining", self.state.frames.len());
                return Ok(self.return_value_to_caller(value));
            }

            OpCode::Pop => {
                self.pop(line)?;
            }
            OpCode::Copy => {
                let v = self.peek(line)?;
                self.push(v);
            }
            OpCode::Nop => {}
        }
        Ok(StepResult::Continue)
    }

    fn global_name(&self, instr: Instruction, line: u32) -> Result<String, VmError> {
        let k = instr.operand.unwrap_or(0);
        match self.const_at(k, line)? {
            Value::String(s) => Ok(s),
            other => Err(VmError::Core(loom_core::Error::CompilerBug { line, message: format!("expected global name string, found {}", other.type_name()) })),
        }
    }

    fn pop_n(&mut self, n: usize, line: u32) -> Result<Vec<Value>, VmError> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop(line)?);
        }
        items.reverse();
        Ok(items)
    }

    fn op_add(&mut self, instr: Instruction, line: u32) -> Result<(), VmError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;
        let flag = instr.operand.unwrap_or(0);
        let result = match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(a), Value::String(b)) => Value::String(a + &b),
            (Value::List(a), Value::List(b)) => {
                if flag == 1 {
                    a.borrow_mut().extend(b.borrow().iter().cloned());
                    Value::List(a)
                } else {
                    let mut items = a.borrow().clone();
                    items.extend(b.borrow().iter().cloned());
                    Value::list(items)
                }
            }
            (a, b) => return Err(VmError::invalid_type(a.type_name(), b.type_name(), "add", line)),
        };
        self.push(result);
        Ok(())
    }

    fn binary_numeric(&mut self, line: u32, context: &str, f: impl Fn(f64, f64) -> Result<f64, ()>) -> Result<(), VmError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => match f(a, b) {
                Ok(v) => {
                    self.push(Value::Number(v));
                    Ok(())
                }
                Err(()) => Err(VmError::Core(loom_core::Error::DivisionByZero { line })),
            },
            (a, b) => Err(VmError::invalid_type(a.type_name(), b.type_name(), context, line)),
        }
    }

    fn op_mod(&mut self, line: u32) -> Result<(), VmError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;
        match (left, right) {
            (Value::Number(_), Value::Number(b)) if b == 0.0 => Err(VmError::Core(loom_core::Error::DivisionByZero { line })),
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Number(a % b));
                Ok(())
            }
            (a, b) => Err(VmError::invalid_type(a.type_name(), b.type_name(), "mod", line)),
        }
    }

    fn compare(&mut self, line: u32, context: &str, f: impl Fn(f64, f64) -> bool) -> Result<(), VmError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Boolean(f(a, b)));
                Ok(())
            }
            (a, b) => Err(VmError::invalid_type(a.type_name(), b.type_name(), context, line)),
        }
    }

    fn logic(&mut self, line: u32, f: impl Fn(bool, bool) -> bool) -> Result<(), VmError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;
        match (left, right) {
            (Value::Boolean(a), Value::Boolean(b)) => {
                self.push(Value::Boolean(f(a, b)));
                Ok(())
            }
            (a, b) => Err(VmError::invalid_type(a.type_name(), b.type_name(), "logic", line)),
        }
    }

    fn subscript_read(&self, container: &Value, key: &Value, line: u32) -> Result<Value, VmError> {
        let idx = self.index_of(key, line)?;
        match container {
            Value::Tuple(items) => items
                .get(idx)
                .cloned()
                .ok_or(VmError::Core(loom_core::Error::IndexError { line })),
            Value::List(items) => items
                .borrow()
                .get(idx)
                .cloned()
                .ok_or(VmError::Core(loom_core::Error::IndexError { line })),
            other => Err(VmError::invalid_type("Tuple or List", other.type_name(), "subscript", line)),
        }
    }

    fn subscript_write(&self, container: &Value, key: &Value, value: Value, line: u32) -> Result<(), VmError> {
        let idx = self.index_of(key, line)?;
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                if idx >= items.len() {
                    return Err(VmError::Core(loom_core::Error::IndexError { line }));
                }
                items[idx] = value;
                Ok(())
            }
            other => Err(VmError::invalid_type("List", other.type_name(), "subscript assignment", line)),
        }
    }

    fn index_of(&self, key: &Value, line: u32) -> Result<usize, VmError> {
        match key {
            Value::Number(n) if *n >= 0.0 => Ok(*n as usize),
            Value::Number(_) => Err(VmError::Core(loom_core::Error::IndexError { line })),
            other => Err(VmError::invalid_type("Number", other.type_name(), "subscript key", line)),
        }
    }

    fn op_call(&mut self, n: usize, line: u32) -> Result<StepResult, VmError> {
        let args = self.pop_n(n, line)?;
        let callee = self.pop(line)?;
        match callee {
            Value::Native(name) => {
                if name == "exit" {
                    let value = args.first().cloned().unwrap_or(Value::Null);
                    return Ok(StepResult::Halted(value));
                }
                if name == "input" {
                    let trap = SyscallTrap { name, args };
                    self.pending_syscall = Some(trap.clone());
                    log::debug!("suspending on native 'input' call");
                    return Ok(StepResult::Syscall(trap));
                }
                let entry = self
                    .natives
                    .get(&name)
                    .cloned()
                    .ok_or(VmError::UnknownNative { name: name.clone(), line })?;
                if !entry.arity.contains(args.len()) {
                    return Err(VmError::Core(loom_core::Error::NativeFunctionArgumentNumberMismatch {
                        name,
                        expected: entry.arity.min(),
                        actual: args.len(),
                        line,
                    }));
                }
                let result = (entry.implementation)(line, &args)?;
                self.push(result);
                Ok(StepResult::Continue)
            }
            Value::Function(func) => {
                if func.params.len() != args.len() {
                    return Err(VmError::Core(loom_core::Error::FunctionArgumentNumberMismatch {
                        name: func.name.clone(),
                        expected: func.params.len(),
                        actual: args.len(),
                        line,
                    }));
                }
                let mut stack = Vec::with_capacity(1 + args.len());
                stack.push(Value::Function(func.clone()));
                stack.extend(args);
                self.state.frames.push(CallFrame::call(func.body.clone(), stack));
                log::trace!("frame pushed for '{}', depth now {}", func.name, self.state.frames.len());
                Ok(StepResult::Continue)
            }
            Value::Syscall(name) => {
                let entry = self
                    .syscalls
                    .get(&name)
                    .cloned()
                    .ok_or(VmError::UnknownSyscall { name: name.clone(), line })?;
                let processed = (entry.preprocessor)(&args, line)?;
                let trap = if name == "syscall" {
                    let Some((Value::String(effective_name), rest)) = processed.split_first().map(|(h, t)| (h.clone(), t.to_vec())) else {
                        return Err(VmError::invalid_type("String", "other", "generic syscall name", line));
                    };
                    SyscallTrap { name: effective_name, args: rest }
                } else {
                    SyscallTrap { name: entry.syscall_id.clone(), args: processed }
                };
                self.pending_syscall = Some(trap.clone());
                log::debug!("suspending on syscall '{}' with {} arg(s)", trap.name, trap.args.len());
                Ok(StepResult::Syscall(trap))
            }
            other => Err(VmError::invalid_type("Native, Function, or Syscall", other.type_name(), "call", line)),
        }
    }
}

enum StepResult {
    Continue,
    Halted(Value),
    Syscall(SyscallTrap),
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_compiler::compile;

    fn run_to_completion(source: &str) -> RunOutcome {
        let program = compile(source).unwrap();
        let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
        vm.run(None)
    }

    #[test]
    fn suspends_on_syscall_with_evaluated_args() {
        let outcome = run_to_completion("let a = 1 + 2; syscall(\"result\", a);");
        match outcome {
            RunOutcome::Syscall(trap) => {
                assert_eq!(trap.name, "result");
                assert_eq!(trap.args, vec![Value::Number(3.0)]);
            }
            other => panic!("expected syscall trap, got {other:?}"),
        }
    }

    #[test]
    fn recursive_factorial() {
        let outcome = run_to_completion(
            "func fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); } syscall(\"r\", fact(5));",
        );
        match outcome {
            RunOutcome::Syscall(trap) => assert_eq!(trap.args, vec![Value::Number(120.0)]),
            other => panic!("expected syscall trap, got {other:?}"),
        }
    }

    #[test]
    fn loop_with_break_accumulates_expected_sum() {
        let outcome = run_to_completion(
            "let s = 0; for (let i = 0; i < 10; i = i + 1) { if (i == 5) { break; } s = s + i; } syscall(\"r\", s);",
        );
        match outcome {
            RunOutcome::Syscall(trap) => assert_eq!(trap.args, vec![Value::Number(10.0)]),
            other => panic!("expected syscall trap, got {other:?}"),
        }
    }

    #[test]
    fn list_mutation_through_subscript_is_visible_after() {
        let outcome = run_to_completion("let xs = [1,2,3]; xs[1] = 9; syscall(\"r\", xs);");
        match outcome {
            RunOutcome::Syscall(trap) => {
                assert_eq!(trap.args.len(), 1);
                assert_eq!(trap.args[0].repr(), "[1, 9, 3]");
            }
            other => panic!("expected syscall trap, got {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_traps_with_exact_line() {
        let program = compile("let a = 1 / 0;\n").unwrap();
        let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
        match vm.run(None) {
            RunOutcome::Error(VmError::Core(loom_core::Error::DivisionByZero { line })) => assert_eq!(line, 1),
            other => panic!("expected division-by-zero error, got {other:?}"),
        }
    }

    #[test]
    fn resuming_a_suspended_input_call_delivers_the_host_value() {
        let program = compile("let a = input(); let r = 2 + number(a); syscall(\"dummy\", r);").unwrap();
        let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());

        let outcome = vm.run(None);
        let trap = match &outcome {
            RunOutcome::Syscall(trap) => trap.clone(),
            other => panic!("expected a suspension on 'input', got {other:?}"),
        };
        assert_eq!(trap.name, "input");
        assert!(trap.args.is_empty());

        let snapshot = crate::serializer::serialize(&vm, &outcome).unwrap();
        let mut resumed = crate::serializer::deserialize(
            &snapshot,
            NativeRegistry::stdlib(),
            SyscallRegistry::with_generic(),
            Some(Value::Number(3.0)),
        )
        .unwrap();

        match resumed.run(None) {
            RunOutcome::Syscall(trap) => {
                assert_eq!(trap.name, "dummy");
                assert_eq!(trap.args, vec![Value::Number(5.0)]);
            }
            other => panic!("expected the dummy syscall trap, got {other:?}"),
        }
    }

    #[test]
    fn exit_halts_immediately_even_with_no_argument() {
        let outcome = run_to_completion("let a = 1; exit();");
        assert_eq!(outcome, RunOutcome::Halted(Value::Null));
    }

    #[test]
    fn exit_halts_with_its_argument_and_skips_remaining_code() {
        let outcome = run_to_completion("exit(42); syscall(\"unreached\");");
        assert_eq!(outcome, RunOutcome::Halted(Value::Number(42.0)));
    }

    #[test]
    fn tuple_and_list_reprs_differ() {
        let program = compile("let t = (1,2); let l = [1,2]; syscall(\"r\", t); syscall(\"r2\", l);").unwrap();
        let mut vm = Vm::new(program, NativeRegistry::stdlib(), SyscallRegistry::with_generic());
        let RunOutcome::Syscall(trap) = vm.run(None) else { panic!("expected syscall") };
        assert!(trap.args[0].repr().starts_with('('));
    }
}
