//! Hand-written single-pass lexer: no external lexer-generator crate,
//! just a cursor tracking line/col over `char_indices` and a `peek`/`bump`
//! pair.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Number(f64),
    String(String),
    Identifier(String),

    Let,
    Func,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Return,
    True,
    False,
    Null,
    Import,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Colon,

    Assign,
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    AndAnd,
    OrOr,
    Bang,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), line: 1, col: 1 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws_and_comments();
            let (line, col) = (self.line, self.col);
            let Some(&(start, ch)) = self.chars.peek() else {
                tokens.push(Token { kind: TokKind::Eof, line, col });
                break;
            };

            let kind = if ch.is_ascii_digit() {
                self.read_number()?
            } else if ch == '"' {
                self.read_string()?
            } else if is_ident_start(ch) {
                self.read_ident()
            } else {
                self.read_punct(start)?
            };

            tokens.push(Token { kind, line, col });
        }
        Ok(tokens)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut clone = self.chars.clone();
                    clone.next();
                    if matches!(clone.peek(), Some(&(_, '/'))) {
                        while !matches!(self.peek_char(), Some('\n') | None) {
                            self.bump();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_number(&mut self) -> Result<TokKind, CompileError> {
        let start_line = self.line;
        let mut text = String::new();
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if self.peek_char() == Some('.') {
            let mut clone = self.chars.clone();
            clone.next();
            if matches!(clone.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
                while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    text.push(self.bump().unwrap());
                }
            }
        }
        text.parse::<f64>()
            .map(TokKind::Number)
            .map_err(|_| CompileError::SyntaxError { line: start_line, message: format!("invalid number literal '{text}'") })
    }

    fn read_string(&mut self) -> Result<TokKind, CompileError> {
        let start_line = self.line;
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::SyntaxError { line: start_line, message: "unterminated string literal".into() }),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => out.push(other),
                    None => return Err(CompileError::SyntaxError { line: start_line, message: "unterminated string escape".into() }),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(TokKind::String(out))
    }

    fn read_ident(&mut self) -> TokKind {
        let mut text = String::new();
        while matches!(self.peek_char(), Some(c) if is_ident_continue(c)) {
            text.push(self.bump().unwrap());
        }
        match text.as_str() {
            "let" => TokKind::Let,
            "func" => TokKind::Func,
            "if" => TokKind::If,
            "else" => TokKind::Else,
            "while" => TokKind::While,
            "for" => TokKind::For,
            "break" => TokKind::Break,
            "continue" => TokKind::Continue,
            "return" => TokKind::Return,
            "true" => TokKind::True,
            "false" => TokKind::False,
            "null" => TokKind::Null,
            "import" => TokKind::Import,
            _ => TokKind::Identifier(text),
        }
    }

    fn read_punct(&mut self, _start: usize) -> Result<TokKind, CompileError> {
        let line = self.line;
        let ch = self.bump().unwrap();
        let kind = match ch {
            '(' => TokKind::LParen,
            ')' => TokKind::RParen,
            '{' => TokKind::LBrace,
            '}' => TokKind::RBrace,
            '[' => TokKind::LBracket,
            ']' => TokKind::RBracket,
            ',' => TokKind::Comma,
            ';' => TokKind::Semicolon,
            '.' => TokKind::Dot,
            ':' => TokKind::Colon,
            '+' => {
                if self.peek_char() == Some('+') {
                    self.bump();
                    TokKind::PlusPlus
                } else {
                    TokKind::Plus
                }
            }
            '-' => {
                if self.peek_char() == Some('-') {
                    self.bump();
                    TokKind::MinusMinus
                } else {
                    TokKind::Minus
                }
            }
            '*' => TokKind::Star,
            '/' => TokKind::Slash,
            '%' => TokKind::Percent,
            '=' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    TokKind::EqEq
                } else {
                    TokKind::Assign
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    TokKind::NotEq
                } else {
                    TokKind::Bang
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    TokKind::Lte
                } else {
                    TokKind::Lt
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    TokKind::Gte
                } else {
                    TokKind::Gt
                }
            }
            '&' if self.peek_char() == Some('&') => {
                self.bump();
                TokKind::AndAnd
            }
            '|' if self.peek_char() == Some('|') => {
                self.bump();
                TokKind::OrOr
            }
            other => {
                return Err(CompileError::SyntaxError { line, message: format!("unexpected character '{other}'") });
            }
        };
        Ok(kind)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_let_statement() {
        let toks = kinds("let a = 1 + 2;");
        assert_eq!(
            toks,
            vec![
                TokKind::Let,
                TokKind::Identifier("a".into()),
                TokKind::Assign,
                TokKind::Number(1.0),
                TokKind::Plus,
                TokKind::Number(2.0),
                TokKind::Semicolon,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn handles_string_escapes() {
        let toks = kinds(r#" "a\nb" "#);
        assert_eq!(toks[0], TokKind::String("a\nb".into()));
    }

    #[test]
    fn skips_line_comments() {
        let toks = kinds("1 // comment\n+ 2");
        assert_eq!(toks, vec![TokKind::Number(1.0), TokKind::Plus, TokKind::Number(2.0), TokKind::Eof]);
    }

    #[test]
    fn distinguishes_increment_from_plus() {
        assert_eq!(kinds("++"), vec![TokKind::PlusPlus, TokKind::Eof]);
        assert_eq!(kinds("+ +"), vec![TokKind::Plus, TokKind::Plus, TokKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
