//! AST -> bytecode lowering: scope resolution, jump patching, loop exits.
//!
//! Emits directly against a mutable instruction buffer and constant pool,
//! tracking a real lexical-scope model (`locals: Vec<Local>` mirroring
//! live stack slots) since this language has locals, globals, and loop
//! exits to resolve.

use std::rc::Rc;

use loom_core::{FunctionDef, Instruction, OpCode, Value};

use crate::ast::{BinOp, Expr, Literal, Program as Ast, Stmt, UnOp};
use crate::error::CompileError;

type CResult<T> = Result<T, CompileError>;

struct Local {
    name: String,
    depth: u32,
}

#[derive(Default)]
struct LoopCtx {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

pub struct Compiler {
    text: Vec<Instruction>,
    locals: Vec<Local>,
    depth: u32,
    loops: Vec<LoopCtx>,
    imports: Vec<String>,
}

impl Compiler {
    fn new(depth: u32, locals: Vec<Local>) -> Self {
        Self { text: Vec::new(), locals, depth, loops: Vec::new(), imports: Vec::new() }
    }

    /// Compile a full program into a `loom_core::Program`.
    pub fn compile_program(ast: &Ast) -> CResult<loom_core::Program> {
        let mut program = loom_core::Program::new();
        let mut compiler = Compiler::new(0, Vec::new());
        for stmt in &ast.statements {
            compiler.compile_stmt(&mut program.data, stmt)?;
        }
        program.text = compiler.text;
        program.imports = compiler.imports;
        Ok(program)
    }

    fn emit(&mut self, op: OpCode, line: u32) -> usize {
        self.text.push(Instruction::bare(op, line));
        self.text.len() - 1
    }

    fn emit_operand(&mut self, op: OpCode, operand: i64, line: u32) -> usize {
        self.text.push(Instruction::with_operand(op, operand, line));
        self.text.len() - 1
    }

    fn patch(&mut self, idx: usize) {
        let target = self.text.len();
        self.text[idx].patch_target(target);
    }

    fn patch_to(&mut self, idx: usize, target: usize) {
        self.text[idx].patch_target(target);
    }

    fn resolve_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|l| l.name == name)
    }

    fn declare_variable(&mut self, data: &mut loom_core::ConstPool, name: &str, line: u32) -> CResult<()> {
        if self.depth == 0 {
            let k = data.add(Value::String(name.to_string()));
            self.emit_operand(OpCode::DeclareGl, k as i64, line);
            return Ok(());
        }
        if self.locals.iter().any(|l| l.name == name && l.depth == self.depth) {
            return Err(CompileError::VariableAlreadyDeclaredInScope { name: name.to_string(), line });
        }
        self.locals.push(Local { name: name.to_string(), depth: self.depth });
        Ok(())
    }

    fn load_variable(&mut self, data: &mut loom_core::ConstPool, name: &str, line: u32) {
        if let Some(idx) = self.resolve_local(name) {
            self.emit_operand(OpCode::Load, idx as i64, line);
        } else {
            let k = data.add(Value::String(name.to_string()));
            self.emit_operand(OpCode::LoadGl, k as i64, line);
        }
    }

    fn store_variable(&mut self, data: &mut loom_core::ConstPool, name: &str, line: u32) {
        if let Some(idx) = self.resolve_local(name) {
            self.emit_operand(OpCode::Store, idx as i64, line);
        } else {
            let k = data.add(Value::String(name.to_string()));
            self.emit_operand(OpCode::SetGl, k as i64, line);
        }
    }

    // ---- statements ----

    fn compile_stmt(&mut self, data: &mut loom_core::ConstPool, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::VariableDeclaration { name, value, line } => {
                self.compile_expr(data, value)?;
                self.declare_variable(data, name, *line)?;
                Ok(())
            }
            Stmt::ExpressionStatement { expr, line } => {
                self.compile_expr(data, expr)?;
                self.emit(OpCode::Pop, *line);
                Ok(())
            }
            Stmt::Block { statements, .. } => self.compile_block(data, statements),
            Stmt::If { condition, then_branch, else_branch, line } => {
                self.compile_expr(data, condition)?;
                let jumpf = self.emit_operand(OpCode::JumpF, 0, *line);
                self.compile_stmt(data, then_branch)?;
                if let Some(else_branch) = else_branch {
                    let jump = self.emit_operand(OpCode::Jump, 0, *line);
                    self.patch(jumpf);
                    self.compile_stmt(data, else_branch)?;
                    self.patch(jump);
                } else {
                    self.patch(jumpf);
                }
                Ok(())
            }
            Stmt::While { condition, body, line } => {
                let start = self.text.len();
                self.compile_expr(data, condition)?;
                let jumpf = self.emit_operand(OpCode::JumpF, 0, *line);
                self.loops.push(LoopCtx::default());
                self.compile_stmt(data, body)?;
                let ctx = self.loops.pop().unwrap();
                for c in &ctx.continues {
                    self.patch_to(*c, start);
                }
                self.emit_operand(OpCode::Jump, start as i64, *line);
                self.patch(jumpf);
                for b in &ctx.breaks {
                    self.patch_to(*b, self.text.len());
                }
                Ok(())
            }
            Stmt::For { init, condition, update, body, line } => {
                if let Some(init) = init {
                    self.compile_stmt(data, init)?;
                }
                let start = self.text.len();
                let jumpf = if let Some(condition) = condition {
                    self.compile_expr(data, condition)?;
                    Some(self.emit_operand(OpCode::JumpF, 0, *line))
                } else {
                    self.emit(OpCode::Nop, *line);
                    None
                };
                self.loops.push(LoopCtx::default());
                self.compile_stmt(data, body)?;
                let update_start = self.text.len();
                if let Some(update) = update {
                    self.compile_expr(data, update)?;
                    self.emit(OpCode::Pop, *line);
                }
                let ctx = self.loops.pop().unwrap();
                for c in &ctx.continues {
                    self.patch_to(*c, update_start);
                }
                self.emit_operand(OpCode::Jump, start as i64, *line);
                if let Some(jumpf) = jumpf {
                    self.patch(jumpf);
                }
                for b in &ctx.breaks {
                    self.patch_to(*b, self.text.len());
                }
                Ok(())
            }
            Stmt::Break { line } => {
                if self.loops.is_empty() {
                    return Err(CompileError::SyntaxError { line: *line, message: "'break' outside a loop".into() });
                }
                let idx = self.emit_operand(OpCode::Jump, 0, *line);
                self.loops.last_mut().unwrap().breaks.push(idx);
                Ok(())
            }
            Stmt::Continue { line } => {
                if self.loops.is_empty() {
                    return Err(CompileError::SyntaxError { line: *line, message: "'continue' outside a loop".into() });
                }
                let idx = self.emit_operand(OpCode::Jump, 0, *line);
                self.loops.last_mut().unwrap().continues.push(idx);
                Ok(())
            }
            Stmt::FunctionDeclaration { name, params, body, line } => self.compile_function(data, name, params, body, *line),
            Stmt::Return { value, line } => {
                if let Some(value) = value {
                    self.compile_expr(data, value)?;
                    self.emit_operand(OpCode::Ret, 1, *line);
                } else {
                    self.emit_operand(OpCode::Ret, 0, *line);
                }
                Ok(())
            }
            Stmt::Import { path, .. } => {
                self.imports.push(path.clone());
                Ok(())
            }
            Stmt::Empty { .. } => Ok(()),
        }
    }

    fn compile_block(&mut self, data: &mut loom_core::ConstPool, statements: &[Stmt]) -> CResult<()> {
        self.depth += 1;
        for stmt in statements {
            self.compile_stmt(data, stmt)?;
        }
        let line = statements.last().map(|s| s.line()).unwrap_or(0);
        let mut popped = 0;
        while let Some(last) = self.locals.last() {
            if last.depth >= self.depth {
                self.locals.pop();
                popped += 1;
            } else {
                break;
            }
        }
        for _ in 0..popped {
            self.emit(OpCode::Pop, line);
        }
        self.depth -= 1;
        Ok(())
    }

    fn compile_function(&mut self, data: &mut loom_core::ConstPool, name: &str, params: &[String], body: &[Stmt], line: u32) -> CResult<()> {
        let mut locals = vec![Local { name: name.to_string(), depth: 0 }];
        for p in params {
            locals.push(Local { name: p.clone(), depth: 1 });
        }
        let mut inner = Compiler::new(1, locals);
        for stmt in body {
            inner.compile_stmt(data, stmt)?;
        }
        inner.emit_operand(OpCode::Ret, 0, line);
        self.imports.extend(inner.imports);

        let def = FunctionDef { name: name.to_string(), params: params.to_vec(), body: inner.text };
        let k = data.add(Value::Function(Rc::new(def)));
        self.emit_operand(OpCode::Data, k as i64, line);
        self.declare_variable(data, name, line)
    }

    // ---- expressions ----

    fn compile_expr(&mut self, data: &mut loom_core::ConstPool, expr: &Expr) -> CResult<()> {
        match expr {
            Expr::Literal { value, line } => {
                let v = match value {
                    Literal::Number(n) => Value::Number(*n),
                    Literal::String(s) => Value::String(s.clone()),
                    Literal::Boolean(b) => Value::Boolean(*b),
                    Literal::Null => Value::Null,
                };
                let k = data.add(v);
                self.emit_operand(OpCode::Data, k as i64, *line);
                Ok(())
            }
            Expr::Identifier { name, line } => {
                self.load_variable(data, name, *line);
                Ok(())
            }
            Expr::Binary { op, left, right, line } => {
                self.compile_expr(data, left)?;
                self.compile_expr(data, right)?;
                self.emit(binop_to_opcode(*op), *line);
                Ok(())
            }
            Expr::Unary { op, operand, line } => self.compile_unary(data, *op, operand, *line),
            Expr::Assignment { target, value, line } => self.compile_assignment(data, target, value, *line),
            Expr::Call { callee, args, line } => {
                self.compile_expr(data, callee)?;
                for arg in args {
                    self.compile_expr(data, arg)?;
                }
                self.emit_operand(OpCode::Call, args.len() as i64, *line);
                Ok(())
            }
            Expr::Tuple { items, line } => {
                for item in items {
                    self.compile_expr(data, item)?;
                }
                self.emit_operand(OpCode::MakeTuple, items.len() as i64, *line);
                Ok(())
            }
            Expr::List { items, line } => {
                for item in items {
                    self.compile_expr(data, item)?;
                }
                self.emit_operand(OpCode::MakeList, items.len() as i64, *line);
                Ok(())
            }
            Expr::Subscript { container, index, line } => {
                self.compile_expr(data, container)?;
                self.compile_expr(data, index)?;
                self.emit(OpCode::Subscript, *line);
                Ok(())
            }
        }
    }

    fn compile_unary(&mut self, data: &mut loom_core::ConstPool, op: UnOp, operand: &Expr, line: u32) -> CResult<()> {
        match op {
            UnOp::Neg => {
                self.compile_expr(data, operand)?;
                self.emit(OpCode::Neg, line);
                Ok(())
            }
            UnOp::Not => {
                self.compile_expr(data, operand)?;
                self.emit(OpCode::Not, line);
                Ok(())
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                let Expr::Identifier { name, .. } = operand else {
                    return Err(CompileError::SyntaxError { line, message: "'++'/'--' only apply to identifiers".into() });
                };
                let postfix = matches!(op, UnOp::PostInc | UnOp::PostDec);
                let step = if matches!(op, UnOp::PreInc | UnOp::PostInc) { OpCode::Inc } else { OpCode::Dec };

                self.load_variable(data, name, line);
                if postfix {
                    self.emit(OpCode::Copy, line);
                }
                self.emit(step, line);
                self.store_variable(data, name, line);
                if postfix {
                    self.emit(OpCode::Pop, line);
                }
                Ok(())
            }
        }
    }

    fn compile_assignment(&mut self, data: &mut loom_core::ConstPool, target: &Expr, value: &Expr, line: u32) -> CResult<()> {
        match target {
            Expr::Identifier { name, .. } => {
                self.compile_expr(data, value)?;
                self.store_variable(data, name, line);
                Ok(())
            }
            Expr::Subscript { container, index, .. } => {
                self.compile_expr(data, value)?;
                self.compile_expr(data, container)?;
                self.compile_expr(data, index)?;
                self.emit(OpCode::StoreSubscript, line);
                Ok(())
            }
            _ => Err(CompileError::SyntaxError { line, message: "assignment target must be an identifier or subscript".into() }),
        }
    }
}

fn binop_to_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Div => OpCode::Div,
        BinOp::Mod => OpCode::Mod,
        BinOp::Lt => OpCode::Lt,
        BinOp::Gt => OpCode::Gt,
        BinOp::Lte => OpCode::Lte,
        BinOp::Gte => OpCode::Gte,
        BinOp::Eq => OpCode::Eq,
        BinOp::Neq => OpCode::Neq,
        BinOp::And => OpCode::And,
        BinOp::Or => OpCode::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(src: &str) -> loom_core::Program {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        Compiler::compile_program(&ast).unwrap()
    }

    #[test]
    fn let_at_top_level_emits_declaregl() {
        let program = compile("let a = 1;");
        assert!(program.text.iter().any(|i| i.op == OpCode::DeclareGl));
    }

    #[test]
    fn local_in_block_emits_load_not_loadgl() {
        let program = compile("if (true) { let a = 1; let b = a + 1; }");
        assert!(program.text.iter().any(|i| i.op == OpCode::Load));
    }

    #[test]
    fn import_statements_are_recorded_on_the_program_not_compiled_to_bytecode() {
        let with_import = compile("import \"math\"; let a = 1;");
        let without_import = compile("let a = 1;");
        assert_eq!(with_import.imports, vec!["math".to_string()]);
        assert_eq!(with_import.text.len(), without_import.text.len(), "import emits no bytecode of its own");
    }

    #[test]
    fn break_outside_loop_is_a_syntax_error() {
        let tokens = Lexer::new("break;").tokenize().unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        assert!(Compiler::compile_program(&ast).is_err());
    }

    #[test]
    fn function_body_ends_with_ret() {
        let program = compile("func f(x) { return x; }");
        let func_const = program.data.iter().find_map(|(_, v)| match v {
            Value::Function(f) => Some(f.clone()),
            _ => None,
        });
        let func = func_const.expect("function constant present");
        assert_eq!(func.body.last().unwrap().op, OpCode::Ret);
    }

    #[test]
    fn jump_targets_are_in_range_after_if_else() {
        let program = compile("if (true) { let a = 1; } else { let a = 2; }");
        for instr in &program.text {
            if let Some(t) = instr.jump_target() {
                assert!(t <= program.text.len());
            }
        }
    }
}
