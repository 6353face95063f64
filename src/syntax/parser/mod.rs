use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::span::{Span, Spanned};
use crate::types::Type;
use crate::value::Value;

/// Maximum nesting depth for types and literals.
const MAX_NESTING_DEPTH: u32 = 256;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    /// Parse a complete datashape type.
    pub(crate) fn parse_type_input(mut self) -> Result<Type, Vec<Diagnostic>> {
        let ty = self.parse_type();
        self.expect_eof();
        match ty {
            Some(ty) if self.diagnostics.is_empty() => Ok(ty),
            _ => Err(self.diagnostics),
        }
    }

    /// Parse a complete value literal.
    pub(crate) fn parse_value_input(mut self) -> Result<Value, Vec<Diagnostic>> {
        let value = self.parse_value();
        self.expect_eof();
        match value {
            Some(value) if self.diagnostics.is_empty() => Ok(value),
            _ => Err(self.diagnostics),
        }
    }

    // --- Types ---

    fn parse_type(&mut self) -> Option<Type> {
        if !self.enter() {
            return None;
        }
        let ty = self.parse_type_inner();
        self.depth -= 1;
        ty
    }

    fn parse_type_inner(&mut self) -> Option<Type> {
        match self.peek().clone() {
            Lexeme::Integer(n) => {
                self.advance();
                self.expect(&Lexeme::Star)?;
                let elem = self.parse_type()?;
                Some(Type::fixed(elem, n as usize))
            }
            Lexeme::Ident(name) if name == "var" => {
                self.advance();
                self.expect(&Lexeme::Star)?;
                let elem = self.parse_type()?;
                Some(Type::var(elem))
            }
            Lexeme::Ident(name) => {
                let span = self.current_span();
                self.advance();
                match Type::from_scalar_name(&name) {
                    Some(ty) => Some(ty),
                    None => {
                        self.diagnostics.push(
                            Diagnostic::error(ErrorCode::Syntax, format!("unknown type '{}'", name))
                                .at(span)
                                .with_help(
                                    "scalar types are bool, int8..int64, uint8..uint64, \
                                     float32, float64, complex64, complex128 and string"
                                        .to_string(),
                                ),
                        );
                        None
                    }
                }
            }
            Lexeme::LBrace => self.parse_struct_type(),
            _ => {
                self.error_at_current("expected a type");
                None
            }
        }
    }

    fn parse_struct_type(&mut self) -> Option<Type> {
        self.expect(&Lexeme::LBrace)?;
        let mut fields: Vec<(String, Type)> = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let span = self.current_span();
            let name = self.expect_field_name()?;
            if fields.iter().any(|(existing, _)| *existing == name) {
                self.diagnostics.push(
                    Diagnostic::error(ErrorCode::Syntax, format!("duplicate field '{}'", name))
                        .at(span),
                );
            }
            self.expect(&Lexeme::Colon)?;
            let ty = self.parse_type()?;
            fields.push((name, ty));
            if !self.eat(&Lexeme::Comma) && !self.eat(&Lexeme::Semicolon) {
                break;
            }
        }
        self.expect(&Lexeme::RBrace)?;
        Some(Type::Struct(fields))
    }

    // --- Values ---

    fn parse_value(&mut self) -> Option<Value> {
        if !self.enter() {
            return None;
        }
        let value = self.parse_value_inner();
        self.depth -= 1;
        value
    }

    fn parse_value_inner(&mut self) -> Option<Value> {
        match self.peek().clone() {
            Lexeme::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
                    items.push(self.parse_value()?);
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RBracket)?;
                Some(Value::List(items))
            }
            Lexeme::LBrace => {
                self.advance();
                let mut fields: Vec<(String, Value)> = Vec::new();
                while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
                    let span = self.current_span();
                    let name = self.expect_field_name()?;
                    if fields.iter().any(|(existing, _)| *existing == name) {
                        self.diagnostics.push(
                            Diagnostic::error(
                                ErrorCode::Syntax,
                                format!("duplicate field '{}'", name),
                            )
                            .at(span),
                        );
                    }
                    self.expect(&Lexeme::Colon)?;
                    fields.push((name, self.parse_value()?));
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RBrace)?;
                Some(Value::Record(fields))
            }
            Lexeme::LParen => {
                self.advance();
                let value = self.parse_value()?;
                self.expect(&Lexeme::RParen)?;
                Some(value)
            }
            Lexeme::Str(s) => {
                self.advance();
                Some(Value::Str(s))
            }
            Lexeme::Ident(name) => {
                let span = self.current_span();
                self.advance();
                match name.as_str() {
                    "true" | "True" => Some(Value::Bool(true)),
                    "false" | "False" => Some(Value::Bool(false)),
                    "null" | "None" => Some(Value::Null),
                    "inf" => Some(Value::Float(f64::INFINITY)),
                    "nan" => Some(Value::Float(f64::NAN)),
                    _ => {
                        self.diagnostics.push(
                            Diagnostic::error(
                                ErrorCode::Syntax,
                                format!("unknown literal '{}'", name),
                            )
                            .at(span)
                            .with_help("strings must be quoted".to_string()),
                        );
                        None
                    }
                }
            }
            Lexeme::Minus | Lexeme::Integer(_) | Lexeme::Float(_) | Lexeme::Imaginary(_) => {
                self.parse_number()
            }
            _ => {
                self.error_at_current("expected a value");
                None
            }
        }
    }

    /// `-?real`, `-?imag`, or `-?real (+|-) imag`.
    fn parse_number(&mut self) -> Option<Value> {
        let start = self.current_span();
        let negative = self.eat(&Lexeme::Minus);
        let value = match self.peek().clone() {
            Lexeme::Integer(n) => {
                self.advance();
                self.signed_integer(n, negative, start)?
            }
            Lexeme::Float(f) => {
                self.advance();
                Value::Float(if negative { -f } else { f })
            }
            Lexeme::Ident(name) if name == "inf" => {
                self.advance();
                Value::Float(if negative {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                })
            }
            Lexeme::Imaginary(im) => {
                self.advance();
                return Some(Value::Complex(0.0, if negative { -im } else { im }));
            }
            _ => {
                self.error_at_current("expected a number");
                return None;
            }
        };

        let sign = match self.peek() {
            Lexeme::Plus => 1.0,
            Lexeme::Minus => -1.0,
            _ => return Some(value),
        };
        if !matches!(self.peek_at(1), Lexeme::Imaginary(_)) {
            return Some(value);
        }
        self.advance();
        let Lexeme::Imaginary(im) = self.peek().clone() else {
            return Some(value);
        };
        self.advance();
        let re = value.as_f64().unwrap_or(0.0);
        Some(Value::Complex(re, sign * im))
    }

    fn signed_integer(&mut self, n: u64, negative: bool, start: Span) -> Option<Value> {
        if !negative {
            return Some(match i64::try_from(n) {
                Ok(i) => Value::Int(i),
                Err(_) => Value::UInt(n),
            });
        }
        if n <= i64::MAX as u64 {
            Some(Value::Int(-(n as i64)))
        } else if n == i64::MAX as u64 + 1 {
            Some(Value::Int(i64::MIN))
        } else {
            let span = start.to(self.prev_span());
            self.diagnostics.push(
                Diagnostic::error(
                    ErrorCode::Syntax,
                    format!("integer literal -{} is too small", n),
                )
                .at(span)
                .with_help(format!("minimum integer value is {}", i64::MIN)),
            );
            None
        }
    }

    // --- Token helpers ---

    fn enter(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_at_current("nesting depth exceeded (maximum 256 levels)");
            self.depth -= 1;
            return false;
        }
        true
    }

    fn expect_field_name(&mut self) -> Option<String> {
        match self.peek().clone() {
            Lexeme::Ident(name) | Lexeme::Str(name) => {
                self.advance();
                Some(name)
            }
            _ => {
                self.error_at_current("expected a field name");
                None
            }
        }
    }

    fn expect_eof(&mut self) {
        if !self.at(&Lexeme::Eof) && self.diagnostics.is_empty() {
            self.error_with_help(
                &format!("unexpected {} after the end of input", self.peek().description()),
                "remove the trailing text",
            );
        }
    }

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].node
    }

    fn peek_at(&self, ahead: usize) -> &Lexeme {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Option<Span> {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            Some(span)
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            None
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(ErrorCode::Syntax, msg.to_string()).at(self.current_span()));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(ErrorCode::Syntax, msg.to_string())
                .at(self.current_span())
                .with_help(help.to_string()),
        );
    }
}
