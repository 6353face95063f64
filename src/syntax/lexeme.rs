/// Lexemes of the datashape type syntax and the value literal syntax.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Symbols
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;
    Star,      // *
    Plus,      // +
    Minus,     // -
    Arrow,     // ->
    LParen,    // (
    RParen,    // )

    // Literals
    Integer(u64),
    Float(f64),
    /// `2j`, `0.5j`: the imaginary part of a complex literal.
    Imaginary(f64),
    Str(String),
    Ident(String),

    Eof,
}

impl Lexeme {
    /// Human-readable name for error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Lexeme::LBrace => "'{'",
            Lexeme::RBrace => "'}'",
            Lexeme::LBracket => "'['",
            Lexeme::RBracket => "']'",
            Lexeme::Comma => "','",
            Lexeme::Colon => "':'",
            Lexeme::Semicolon => "';'",
            Lexeme::Star => "'*'",
            Lexeme::Plus => "'+'",
            Lexeme::Minus => "'-'",
            Lexeme::Arrow => "'->'",
            Lexeme::LParen => "'('",
            Lexeme::RParen => "')'",
            Lexeme::Integer(_) => "integer literal",
            Lexeme::Float(_) => "float literal",
            Lexeme::Imaginary(_) => "imaginary literal",
            Lexeme::Str(_) => "string literal",
            Lexeme::Ident(_) => "identifier",
            Lexeme::Eof => "end of input",
        }
    }
}
