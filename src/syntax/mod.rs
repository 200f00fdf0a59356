//! Textual IR front end: lexer and recursive-descent parser.

pub mod lexeme;
pub(crate) mod lexer;
pub(crate) mod parser;

use crate::diagnostic::Diagnostic;
use crate::ir::Module;

use lexer::Lexer;
use parser::Parser;

/// Parse textual IR into a [`Module`]. Lex errors stop before parsing.
pub fn parse_module(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    Parser::new(tokens).parse_module()
}
