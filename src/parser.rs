//! Parser for the pin and binding notation
//!
//! Parses strings like:
//! - `SUM0:a`, `SUM0` (first output), `IP0/int:k` (macro internals)
//! - `+1`, `-1`, `None`
//! - `0.5`, `true`, `$alpha`

use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Token};
use crate::machine::{Pin, PseudoPart};
use crate::program::InputBinding;

/// Parser for one notation string
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
    error: Option<CompileError>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current: None,
            error: None,
        };
        parser.advance();
        parser
    }

    /// Advance to the next token, remembering the first lexer error
    fn advance(&mut self) -> Option<Token> {
        let prev = self.current.take();
        self.current = match self.lexer.next() {
            Some(Ok(token)) => Some(token),
            Some(Err(())) => {
                if self.error.is_none() {
                    self.error = Some(CompileError::LexerError {
                        position: self.lexer.span().start,
                        message: format!("unexpected '{}'", self.lexer.slice()),
                    });
                }
                None
            }
            None => None,
        };
        prev
    }

    /// Fail on leftover input or a pending lexer error
    fn finish<T>(&mut self, value: T) -> CompileResult<T> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        match &self.current {
            None => Ok(value),
            Some(tok) => Err(CompileError::parse_error(format!("Unexpected trailing '{}'", tok))),
        }
    }

    /// Parse a program input binding
    pub fn parse_binding(&mut self) -> CompileResult<InputBinding> {
        let binding = match self.advance() {
            Some(Token::Number(n)) => InputBinding::Number(n),
            Some(Token::Bool(b)) => InputBinding::Bool(b),
            Some(Token::PlusOne) => InputBinding::Pseudo(PseudoPart::PlusOne),
            Some(Token::MinusOne) => InputBinding::Pseudo(PseudoPart::MinusOne),
            Some(Token::Disconnected) => InputBinding::Pseudo(PseudoPart::Disconnected),
            Some(Token::Dollar) => InputBinding::Coefficient(self.expect_ident()?),
            Some(Token::Ident(name)) => {
                let (part, port) = self.parse_target(name)?;
                InputBinding::Reference { part, port }
            }
            other => return Err(self.unexpected(other, "a binding")),
        };
        self.finish(binding)
    }

    /// Parse a machine-side pin (no literal values)
    pub fn parse_pin(&mut self) -> CompileResult<Pin> {
        let pin = match self.advance() {
            Some(Token::PlusOne) => Pin::Pseudo(PseudoPart::PlusOne),
            Some(Token::MinusOne) => Pin::Pseudo(PseudoPart::MinusOne),
            Some(Token::Disconnected) => Pin::Pseudo(PseudoPart::Disconnected),
            Some(Token::Ident(name)) => {
                let (part, port) = self.parse_target(name)?;
                Pin::Port { part, port }
            }
            other => return Err(self.unexpected(other, "a pin")),
        };
        self.finish(pin)
    }

    /// Parse `name ('/' name)* (':' port)?` after the first name
    fn parse_target(&mut self, first: String) -> CompileResult<(String, Option<String>)> {
        let mut part = first;
        while self.current == Some(Token::Slash) {
            self.advance();
            part.push('/');
            part.push_str(&self.expect_ident()?);
        }

        let port = if self.current == Some(Token::Colon) {
            self.advance();
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok((part, port))
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(self.unexpected(other, "a name")),
        }
    }

    fn unexpected(&mut self, found: Option<Token>, expected: &str) -> CompileError {
        if let Some(err) = self.error.take() {
            return err;
        }
        match found {
            Some(tok) => CompileError::parse_error(format!("Expected {}, got '{}'", expected, tok)),
            None => CompileError::parse_error(format!("Expected {}, got end of input", expected)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference() {
        let binding = Parser::new("INT0:o").parse_binding().unwrap();
        assert_eq!(binding, InputBinding::reference("INT0", "o"));
    }

    #[test]
    fn test_parse_macro_path_pin() {
        let pin = Parser::new("IP0/int:k").parse_pin().unwrap();
        assert_eq!(pin, Pin::port("IP0/int", "k"));
    }

    #[test]
    fn test_parse_pseudo() {
        assert_eq!(
            Parser::new("None").parse_binding().unwrap(),
            InputBinding::Pseudo(PseudoPart::Disconnected)
        );
        assert_eq!(Parser::new(" -1 ").parse_pin().unwrap(), Pin::Pseudo(PseudoPart::MinusOne));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(Parser::new("-0.75").parse_binding().unwrap(), InputBinding::Number(-0.75));
        assert_eq!(Parser::new("false").parse_binding().unwrap(), InputBinding::Bool(false));
    }

    #[test]
    fn test_literal_is_not_a_pin() {
        assert!(Parser::new("0.5").parse_pin().is_err());
    }

    #[test]
    fn test_trailing_input() {
        let err = Parser::new("SUM0:a b").parse_binding().unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }));
    }

    #[test]
    fn test_missing_port_name() {
        assert!(Parser::new("SUM0:").parse_binding().is_err());
    }

    #[test]
    fn test_lexer_error_position() {
        let err = Parser::new("SUM0:a#").parse_binding().unwrap_err();
        match err {
            CompileError::LexerError { position, .. } => assert_eq!(position, 6),
            other => panic!("expected lexer error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(Parser::new("").parse_binding().is_err());
    }
}
