//! Front end for the confined language: tokens, syntax tree and parser.
//!
//! Parse failures never escape as host errors. The interpreter turns a
//! [`ParseError`] into a thrown `SyntaxError` value inside the environment,
//! so it crosses the boundary like any other confined failure.

pub mod ast;
pub mod lexer;
pub mod parser;

use std::fmt;

pub use ast::Program;
pub use parser::{parse_expression_source, parse_program};

/// A lexing or parsing failure with its source position (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.line, self.col)
    }
}

impl std::error::Error for ParseError {}
