//! loom-compiler — lexer, parser, and codegen for the Loom language.
//!
//! One public entrypoint, `compile`, backed by lexer/parser/ast/compiler
//! modules kept separate since the grammar has enough surface (control
//! flow, functions, tuples, lists, subscripts) to warrant it.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;

pub use error::CompileError;

use compiler::Compiler;
use lexer::Lexer;
use parser::Parser;

/// Compile source text straight through to a `loom_core::Program`.
pub fn compile(source: &str) -> Result<loom_core::Program, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    let ast = Parser::new(tokens).parse_program()?;
    Compiler::compile_program(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::OpCode;

    #[test]
    fn compiles_end_to_end() {
        let program = compile("let a = 1 + 2;").unwrap();
        assert!(program.text.iter().any(|i| i.op == OpCode::DeclareGl));
    }

    #[test]
    fn surfaces_lexer_errors() {
        assert!(compile("let a = \"unterminated;").is_err());
    }

    #[test]
    fn surfaces_parser_errors() {
        assert!(compile("let a = ;").is_err());
    }
}
