//! Lexer for the pin and binding notation using logos
//!
//! Supports tokens like:
//! - Names: SUM0, int_a, INT2pm
//! - Numbers: 0.5, 1e-3, -0.25
//! - Constants: +1, -1, None, true, false
//! - Punctuation: `:` (port), `/` (macro path), `$` (coefficient)

use logos::Logos;

/// Token types for the pin notation
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Pseudo parts
    #[token("+1")]
    PlusOne,

    #[token("-1")]
    MinusOne,

    #[token("None")]
    Disconnected,

    // Literals
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),

    #[regex(r"[+-]?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Punctuation
    #[token(":")]
    Colon,

    #[token("/")]
    Slash,

    #[token("$")]
    Dollar,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::PlusOne => write!(f, "+1"),
            Token::MinusOne => write!(f, "-1"),
            Token::Disconnected => write!(f, "None"),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Colon => write!(f, ":"),
            Token::Slash => write!(f, "/"),
            Token::Dollar => write!(f, "$"),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }

    /// Text of the token last returned
    pub fn slice(&self) -> &'source str {
        self.inner.slice()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
