//! Lexer for the contraction language.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::location::{Span, SourceLocation};
use crate::utils::errors::{LexerError, LexerErrorKind};
use unicode_xid::UnicodeXID;
use std::iter::Peekable;
use std::str::Chars;

/// A lexer for tokenizing source code.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
    /// Current position
    loc: SourceLocation,
    /// Start of current token
    token_start: SourceLocation,
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            loc: SourceLocation::start(),
            token_start: SourceLocation::start(),
            at_eof: false,
        }
    }

    fn make_span(&self) -> Span {
        Span::new(self.token_start, self.loc)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Character after the current one.
    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.loc.offset..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.loc.offset += c.len_utf8();
        if c == '\n' {
            self.loc.line += 1;
            self.loc.column = 1;
        } else {
            self.loc.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, `//` comments and `/* */` comments.
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.token_start = self.loc;
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(self.make_error(
                                    "Unterminated block comment",
                                    LexerErrorKind::UnterminatedComment,
                                ))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        let span = self.make_span();
        let lexeme = self.source[span.start.offset..span.end.offset].to_string();
        Token::new(kind, span, lexeme)
    }

    fn make_error(&self, message: &str, kind: LexerErrorKind) -> LexerError {
        LexerError {
            message: message.to_string(),
            span: self.make_span(),
            kind,
        }
    }

    fn scan_number(&mut self) -> Result<Token, LexerError> {
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
        let token = self.make_token(TokenKind::Integer);
        if token.lexeme.parse::<i64>().is_err() {
            return Err(self.make_error(
                &format!("Integer literal {} is out of range", token.lexeme),
                LexerErrorKind::InvalidNumber,
            ));
        }
        Ok(token)
    }

    fn scan_identifier(&mut self) -> Token {
        while self.peek().map(|c| c.is_xid_continue() || c == '_').unwrap_or(false) {
            self.advance();
        }
        let mut token = self.make_token(TokenKind::Identifier);
        if let Some(kind) = TokenKind::keyword(&token.lexeme) {
            token.kind = kind;
        }
        token
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_trivia()?;
        self.token_start = self.loc;

        let c = match self.advance() {
            Some(c) => c,
            None => {
                self.at_eof = true;
                return Ok(self.make_token(TokenKind::Eof));
            }
        };

        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '=' => TokenKind::Equal,
            '<' => TokenKind::Less,
            '>' => TokenKind::Greater,
            '-' => {
                if self.match_char('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            c if c.is_ascii_digit() => return self.scan_number(),
            c if c.is_xid_start() || c == '_' => return Ok(self.scan_identifier()),
            _ => {
                return Err(self.make_error(
                    &format!("Unexpected character: '{}'", c),
                    LexerErrorKind::UnexpectedChar,
                ))
            }
        };
        Ok(self.make_token(kind))
    }

    /// Collect all tokens, ending with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn is_at_end(&self) -> bool {
        self.at_eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty() {
        assert_eq!(token_kinds("  \n\t "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_contraction() {
        use TokenKind::*;
        let kinds = token_kinds("C[m, n : M, N] = +(A[m, k] * B[k, n]);");
        assert_eq!(kinds, vec![
            Identifier, LeftBracket, Identifier, Comma, Identifier, Colon, Identifier, Comma,
            Identifier, RightBracket, Equal, Plus, LeftParen, Identifier, LeftBracket, Identifier,
            Comma, Identifier, RightBracket, Star, Identifier, LeftBracket, Identifier, Comma,
            Identifier, RightBracket, RightParen, Semicolon, Eof,
        ]);
    }

    #[test]
    fn test_keyword_and_arrow() {
        let tokens = Lexer::new("function (A) -> (B)").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(tokens[4].kind, TokenKind::Arrow);
        assert_eq!(tokens[4].lexeme, "->");
    }

    #[test]
    fn test_comments() {
        let tokens = Lexer::new("A // line\n/* block\n comment */ B").tokenize().unwrap();
        assert_eq!(tokens[0].lexeme, "A");
        assert_eq!(tokens[1].lexeme, "B");
        assert_eq!(tokens[1].span.start.line, 3);
    }

    #[test]
    fn test_errors() {
        let err = Lexer::new("A # B").tokenize().unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::UnexpectedChar);
        assert_eq!(err.span.start.column, 3);

        let err = Lexer::new("/* open").tokenize().unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::UnterminatedComment);

        let err = Lexer::new("99999999999999999999").tokenize().unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::InvalidNumber);
    }
}
