use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::span::{Span, Spanned};

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident();
            }

            if ch.is_ascii_digit()
                || (ch == b'.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
            {
                return self.scan_number();
            }

            if ch == b'"' || ch == b'\'' {
                if let Some(tok) = self.scan_string(ch) {
                    return tok;
                }
                continue;
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None: error recorded, keep going
        }
    }

    fn scan_ident(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        self.make_token(Lexeme::Ident(text), start, self.pos)
    }

    /// Integers, decimals with optional exponent, and a trailing `j` for
    /// imaginary literals.
    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        let mut is_float = false;
        self.skip_digits();
        if self.peek_at(0) == Some(b'.') {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek_at(0), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.skip_digits();
            } else {
                self.pos = save;
            }
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();

        if matches!(self.peek_at(0), Some(b'j' | b'J')) {
            self.pos += 1;
            let im = text.parse::<f64>().unwrap_or(f64::NAN);
            return self.make_token(Lexeme::Imaginary(im), start, self.pos);
        }

        if is_float {
            return match text.parse::<f64>() {
                Ok(f) => self.make_token(Lexeme::Float(f), start, self.pos),
                Err(_) => {
                    self.error(format!("malformed float literal '{}'", text), start);
                    self.make_token(Lexeme::Float(0.0), start, self.pos)
                }
            };
        }

        match text.parse::<u64>() {
            Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        ErrorCode::Syntax,
                        format!("integer literal '{}' is too large", text),
                    )
                    .at(Span::new(start, self.pos))
                    .with_help(format!("maximum integer value is {}", u64::MAX)),
                );
                self.make_token(Lexeme::Integer(0), start, self.pos)
            }
        }
    }

    fn scan_string(&mut self, quote: u8) -> Option<Spanned<Lexeme>> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            let Some(ch) = self.peek_at(0) else {
                self.error("unterminated string literal".to_string(), start);
                return None;
            };
            self.pos += 1;
            match ch {
                c if c == quote => break,
                b'\\' => {
                    let Some(esc) = self.peek_at(0) else {
                        self.error("unterminated string literal".to_string(), start);
                        return None;
                    };
                    self.pos += 1;
                    match esc {
                        b'n' => bytes.push(b'\n'),
                        b't' => bytes.push(b'\t'),
                        b'r' => bytes.push(b'\r'),
                        b'0' => bytes.push(0),
                        b'\\' | b'"' | b'\'' => bytes.push(esc),
                        other => {
                            self.error(
                                format!("unknown escape sequence '\\{}'", other as char),
                                self.pos - 2,
                            );
                        }
                    }
                }
                _ => bytes.push(ch),
            }
        }
        match String::from_utf8(bytes) {
            Ok(text) => Some(self.make_token(Lexeme::Str(text), start, self.pos)),
            Err(_) => {
                self.error("string literal is not valid UTF-8".to_string(), start);
                None
            }
        }
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;

        let token = match ch {
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b'[' => Lexeme::LBracket,
            b']' => Lexeme::RBracket,
            b'(' => Lexeme::LParen,
            b')' => Lexeme::RParen,
            b',' => Lexeme::Comma,
            b':' => Lexeme::Colon,
            b';' => Lexeme::Semicolon,
            b'*' => Lexeme::Star,
            b'+' => Lexeme::Plus,
            b'-' => {
                if self.peek_at(0) == Some(b'>') {
                    self.pos += 1;
                    Lexeme::Arrow
                } else {
                    Lexeme::Minus
                }
            }
            _ => {
                let shown = std::str::from_utf8(&self.source[start..])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .unwrap_or('?');
                // skip the rest of a multi-byte character
                while self.pos < self.source.len() && (self.source[self.pos] & 0xC0) == 0x80 {
                    self.pos += 1;
                }
                self.error(format!("unexpected character '{}'", shown), start);
                return None;
            }
        };
        Some(self.make_token(token, start, self.pos))
    }

    fn skip_digits(&mut self) {
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn error(&mut self, message: String, start: usize) {
        self.diagnostics.push(
            Diagnostic::error(ErrorCode::Syntax, message).at(Span::new(start, self.pos.max(start + 1))),
        );
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(start, end))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
