//! Text forms: datashape types (`3 * var * float64`) and value literals
//! (`[1, 2.5, "x", {a: 1j}]`).

pub mod lexeme;
pub(crate) mod lexer;
pub(crate) mod parser;
pub mod span;

use crate::diagnostic::Diagnostic;
use crate::types::Type;
use crate::value::Value;

/// Parse a datashape type.
pub fn parse_type(source: &str) -> Result<Type, Vec<Diagnostic>> {
    let tokens = tokenize(source)?;
    parser::Parser::new(tokens).parse_type_input()
}

/// Parse a value literal.
pub fn parse_value(source: &str) -> Result<Value, Vec<Diagnostic>> {
    let tokens = tokenize(source)?;
    parser::Parser::new(tokens).parse_value_input()
}

fn tokenize(source: &str) -> Result<Vec<span::Spanned<lexeme::Lexeme>>, Vec<Diagnostic>> {
    let (tokens, diagnostics) = lexer::Lexer::new(source).tokenize();
    if diagnostics.is_empty() {
        Ok(tokens)
    } else {
        Err(diagnostics)
    }
}
