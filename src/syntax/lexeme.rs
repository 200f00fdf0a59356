/// All lexemes of the textual IR.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Func,
    Async,
    Attributes,

    // Names
    /// Bare or dotted name: operation names, attribute keys, `index`, `f32`,
    /// and the contextual words of `gpu.launch_func`.
    Ident(String),
    /// `%name`
    Value(String),
    /// `@name`
    Symbol(String),
    /// `!gpu.async.token`, without the `!`.
    Dialect(String),
    /// The text between the brackets of `memref<...>`.
    MemRef(String),

    // Symbols
    LParen,     // (
    RParen,     // )
    LBrace,     // {
    RBrace,     // }
    LBracket,   // [
    RBracket,   // ]
    Comma,      // ,
    Colon,      // :
    ColonColon, // ::
    Eq,         // =

    // Literals
    Integer(i64),
    Float(f64),
    Str(Vec<u8>),

    // Special
    Eof,
}

impl Lexeme {
    pub fn from_keyword(s: &str) -> Option<Lexeme> {
        match s {
            "func" => Some(Lexeme::Func),
            "async" => Some(Lexeme::Async),
            "attributes" => Some(Lexeme::Attributes),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Lexeme::Func => "'func'",
            Lexeme::Async => "'async'",
            Lexeme::Attributes => "'attributes'",
            Lexeme::Ident(_) => "identifier",
            Lexeme::Value(_) => "value name",
            Lexeme::Symbol(_) => "symbol name",
            Lexeme::Dialect(_) => "dialect type",
            Lexeme::MemRef(_) => "memref type",
            Lexeme::LParen => "'('",
            Lexeme::RParen => "')'",
            Lexeme::LBrace => "'{'",
            Lexeme::RBrace => "'}'",
            Lexeme::LBracket => "'['",
            Lexeme::RBracket => "']'",
            Lexeme::Comma => "','",
            Lexeme::Colon => "':'",
            Lexeme::ColonColon => "'::'",
            Lexeme::Eq => "'='",
            Lexeme::Integer(_) => "integer literal",
            Lexeme::Float(_) => "float literal",
            Lexeme::Str(_) => "string literal",
            Lexeme::Eof => "end of file",
        }
    }
}
