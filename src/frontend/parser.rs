//! Parser for the contraction language.
//!
//! A recursive descent parser turning a token stream into a [`Function`].
//!
//! ```text
//! function      := "function" IDENT? "(" params? ")" "->" "(" idents? ")" "{" contraction* "}"
//! param         := IDENT ( "[" size ("," size)* "]" )?
//! contraction   := access_sized "=" agg_op "(" access ( combo_op access )? ")" ";"
//! access_sized  := IDENT "[" affine ("," affine)* ( ":" size ("," size)* )? "]"
//! affine        := term ( ("+" | "-") term )*
//! term          := factor ( "*" factor )*
//! factor        := INT | IDENT | "-" factor | "(" affine ")"
//! ```

use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::frontend::ast::*;
use crate::ir::block::AggOp;
use crate::polyhedral::Affine;
use crate::utils::errors::{ParseError, ParseErrorKind};

type ParseResult<T> = Result<T, ParseError>;

/// A parser for the contraction language.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser from a lexer.
    pub fn new(mut lexer: Lexer<'a>) -> ParseResult<Self> {
        let first_token = lexer.next_token().map_err(lexer_error)?;
        Ok(Self {
            lexer,
            current: first_token.clone(),
            previous: first_token,
        })
    }

    /// Parse a complete function.
    pub fn parse_function(&mut self) -> ParseResult<Function> {
        let start = self.current.span;
        self.consume(TokenKind::Function, "Expected 'function'")?;

        let name = if self.check(TokenKind::Identifier) {
            Some(self.consume_identifier("Expected function name")?)
        } else {
            None
        };

        self.consume(TokenKind::LeftParen, "Expected '(' before inputs")?;
        let mut inputs = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                inputs.push(self.parse_param()?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after inputs")?;

        self.consume(TokenKind::Arrow, "Expected '->' after inputs")?;
        self.consume(TokenKind::LeftParen, "Expected '(' before outputs")?;
        let mut outputs = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                outputs.push(self.consume_identifier("Expected output name")?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after outputs")?;

        self.consume(TokenKind::LeftBrace, "Expected '{' before function body")?;
        let mut contractions = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            contractions.push(self.parse_contraction()?);
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after function body")?;
        self.consume(TokenKind::Eof, "Expected end of input after function")?;

        Ok(Function {
            name,
            inputs,
            outputs,
            contractions,
            span: start.merge(&self.previous.span),
        })
    }

    fn parse_param(&mut self) -> ParseResult<Param> {
        let start = self.current.span;
        let name = self.consume_identifier("Expected input name")?;
        let mut dims = Vec::new();
        if self.match_token(TokenKind::LeftBracket)? {
            dims = self.parse_sizes()?;
            self.consume(TokenKind::RightBracket, "Expected ']' after dimensions")?;
        }
        Ok(Param {
            name,
            dims,
            span: start.merge(&self.previous.span),
        })
    }

    fn parse_sizes(&mut self) -> ParseResult<Vec<SizeExpr>> {
        let mut sizes = vec![self.parse_size()?];
        while self.match_token(TokenKind::Comma)? {
            sizes.push(self.parse_size()?);
        }
        Ok(sizes)
    }

    fn parse_size(&mut self) -> ParseResult<SizeExpr> {
        if self.match_token(TokenKind::Integer)? {
            let value = self.previous.lexeme.parse::<u64>().map_err(|_| {
                self.error_at_previous("Invalid dimension size", ParseErrorKind::UnexpectedToken)
            })?;
            return Ok(SizeExpr::Const(value));
        }
        Ok(SizeExpr::Dim(self.consume_identifier("Expected dimension name or size")?))
    }

    fn parse_contraction(&mut self) -> ParseResult<Contraction> {
        let start = self.current.span;
        let out_name = self.consume_identifier("Expected output tensor")?;
        self.consume(TokenKind::LeftBracket, "Expected '[' after output tensor")?;
        let indices = self.parse_indices()?;
        let sizes = if self.match_token(TokenKind::Colon)? {
            self.parse_sizes()?
        } else {
            Vec::new()
        };
        self.consume(TokenKind::RightBracket, "Expected ']' after output indices")?;
        let output = TensorAccess {
            tensor: out_name,
            indices,
            span: start.merge(&self.previous.span),
        };

        self.consume(TokenKind::Equal, "Expected '=' after output")?;
        let agg = self.parse_agg_op()?;
        self.consume(TokenKind::LeftParen, "Expected '(' after aggregation operator")?;

        let mut inputs = vec![self.parse_access()?];
        let mut combo = None;
        if let Some(op) = self.match_combo_op()? {
            combo = Some(op);
            inputs.push(self.parse_access()?);
            if self.match_combo_op()?.is_some() {
                return Err(self.error_at_previous(
                    "A contraction combines at most two inputs",
                    ParseErrorKind::TooManyInputs,
                ));
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after contraction inputs")?;
        self.consume(TokenKind::Semicolon, "Expected ';' after contraction")?;

        Ok(Contraction {
            output,
            sizes,
            agg,
            combo,
            inputs,
            span: start.merge(&self.previous.span),
        })
    }

    fn parse_agg_op(&mut self) -> ParseResult<AggOp> {
        let op = match self.current.kind {
            TokenKind::Plus => AggOp::Add,
            TokenKind::Star => AggOp::Mul,
            TokenKind::Greater => AggOp::Max,
            TokenKind::Less => AggOp::Min,
            TokenKind::Equal => AggOp::Assign,
            _ => {
                return Err(self.error_at_current(
                    "Expected aggregation operator ('+', '*', '>', '<' or '=')",
                    ParseErrorKind::UnknownOperator,
                ))
            }
        };
        self.advance()?;
        Ok(op)
    }

    fn match_combo_op(&mut self) -> ParseResult<Option<CombinationOp>> {
        let op = match self.current.kind {
            TokenKind::Star => CombinationOp::Mul,
            TokenKind::Plus => CombinationOp::Add,
            TokenKind::Minus => CombinationOp::Sub,
            TokenKind::Slash => CombinationOp::Div,
            _ => return Ok(None),
        };
        self.advance()?;
        Ok(Some(op))
    }

    fn parse_access(&mut self) -> ParseResult<TensorAccess> {
        let start = self.current.span;
        let tensor = self.consume_identifier("Expected input tensor")?;
        self.consume(TokenKind::LeftBracket, "Expected '[' after input tensor")?;
        let indices = if self.check(TokenKind::RightBracket) {
            Vec::new()
        } else {
            self.parse_indices()?
        };
        self.consume(TokenKind::RightBracket, "Expected ']' after indices")?;
        Ok(TensorAccess {
            tensor,
            indices,
            span: start.merge(&self.previous.span),
        })
    }

    fn parse_indices(&mut self) -> ParseResult<Vec<Affine>> {
        let mut indices = vec![self.parse_affine()?];
        while self.match_token(TokenKind::Comma)? {
            indices.push(self.parse_affine()?);
        }
        Ok(indices)
    }

    // ==================== Index expressions ====================

    fn parse_affine(&mut self) -> ParseResult<Affine> {
        let mut expr = self.parse_term()?;
        loop {
            if self.match_token(TokenKind::Plus)? {
                expr = expr + self.parse_term()?;
            } else if self.match_token(TokenKind::Minus)? {
                expr = expr - self.parse_term()?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_term(&mut self) -> ParseResult<Affine> {
        let start = self.current.span;
        let mut expr = self.parse_factor()?;
        while self.match_token(TokenKind::Star)? {
            let rhs = self.parse_factor()?;
            expr = match (expr.as_constant(), rhs.as_constant()) {
                (Some(c), _) => rhs * c,
                (_, Some(c)) => expr * c,
                (None, None) => {
                    return Err(ParseError {
                        message: "Index expression is not affine".to_string(),
                        span: start.merge(&self.previous.span),
                        kind: ParseErrorKind::NonAffineIndex,
                        found: Some(format!("({}) * ({})", expr, rhs)),
                    })
                }
            };
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> ParseResult<Affine> {
        if self.match_token(TokenKind::Integer)? {
            let value = self.previous.lexeme.parse::<i64>().map_err(|_| {
                self.error_at_previous("Invalid integer", ParseErrorKind::UnexpectedToken)
            })?;
            return Ok(Affine::constant(value));
        }
        if self.match_token(TokenKind::Identifier)? {
            return Ok(Affine::var(&self.previous.lexeme));
        }
        if self.match_token(TokenKind::Minus)? {
            return Ok(-self.parse_factor()?);
        }
        if self.match_token(TokenKind::LeftParen)? {
            let expr = self.parse_affine()?;
            self.consume(TokenKind::RightParen, "Expected ')' in index expression")?;
            return Ok(expr);
        }
        Err(self.error_at_current("Expected index expression", ParseErrorKind::UnexpectedToken))
    }

    // ==================== Helper Methods ====================

    fn advance(&mut self) -> ParseResult<()> {
        let next = self.lexer.next_token().map_err(lexer_error)?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> ParseResult<()> {
        if self.check(kind) {
            if kind != TokenKind::Eof {
                self.advance()?;
            }
            Ok(())
        } else {
            Err(self.error_at_current(message, ParseErrorKind::UnexpectedToken))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> ParseResult<String> {
        if self.check(TokenKind::Identifier) {
            self.advance()?;
            Ok(self.previous.lexeme.clone())
        } else {
            Err(self.error_at_current(message, ParseErrorKind::ExpectedIdentifier))
        }
    }

    fn is_at_end(&self) -> bool {
        self.current.is_eof()
    }

    fn error_at_current(&self, message: &str, kind: ParseErrorKind) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.current.span,
            kind,
            found: Some(self.current.to_string()),
        }
    }

    fn error_at_previous(&self, message: &str, kind: ParseErrorKind) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.previous.span,
            kind,
            found: Some(self.previous.to_string()),
        }
    }
}

fn lexer_error(e: crate::utils::errors::LexerError) -> ParseError {
    ParseError {
        message: e.message,
        span: e.span,
        kind: ParseErrorKind::Lexer,
        found: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseResult<Function> {
        Parser::new(Lexer::new(source))?.parse_function()
    }

    const MATMUL: &str = "function (A[M, K], B[K, N]) -> (C) { C[m, n : M, N] = +(A[m, k] * B[k, n]); }";

    #[test]
    fn test_parse_matmul() {
        let func = parse(MATMUL).unwrap();
        assert_eq!(func.name, None);
        assert_eq!(func.inputs.len(), 2);
        assert_eq!(func.inputs[0].dims, vec![SizeExpr::Dim("M".into()), SizeExpr::Dim("K".into())]);
        assert_eq!(func.outputs, vec!["C".to_string()]);

        let c = &func.contractions[0];
        assert_eq!(c.output.tensor, "C");
        assert_eq!(c.sizes.len(), 2);
        assert_eq!(c.agg, AggOp::Add);
        assert_eq!(c.combo, Some(CombinationOp::Mul));
        assert_eq!(c.inputs[1].indices, vec![Affine::var("k"), Affine::var("n")]);
        assert_eq!(c.index_names(), vec!["k", "m", "n"]);
    }

    #[test]
    fn test_affine_indices() {
        let func = parse("function conv(I[N], K[3]) -> (O) { O[i] = +(I[2*i + j - 1] * K[j]); }").unwrap();
        assert_eq!(func.name.as_deref(), Some("conv"));
        let c = &func.contractions[0];
        assert!(c.sizes.is_empty());
        let expected = Affine::term("i", 2) + Affine::var("j") - Affine::constant(1);
        assert_eq!(c.inputs[0].indices[0], expected);
        assert_eq!(func.inputs[1].dims, vec![SizeExpr::Const(3)]);
    }

    #[test]
    fn test_constant_factor_on_either_side() {
        let func = parse("function (A[N]) -> (B) { B[i] = =(A[(i + 1) * 3 - i * 2]); }").unwrap();
        let c = &func.contractions[0];
        assert_eq!(c.inputs[0].indices[0], Affine::var("i") + Affine::constant(3));
        assert_eq!(c.agg, AggOp::Assign);
        assert_eq!(c.combo, None);
    }

    #[test]
    fn test_non_affine_index() {
        let err = parse("function (A[N, N]) -> (B) { B[i] = +(A[i * j, j]); }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NonAffineIndex);
    }

    #[test]
    fn test_too_many_inputs() {
        let err = parse("function (A[N], B[N], C[N]) -> (D) { D[i] = +(A[i] * B[i] * C[i]); }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TooManyInputs);
    }

    #[test]
    fn test_unknown_aggregation() {
        let err = parse("function (A[N]) -> (B) { B[i] = -(A[i]); }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownOperator);
    }

    #[test]
    fn test_error_positions() {
        let err = parse("function (A[N]) -> (B) {\n  B[i] = +(A[i]) }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.span.start.line, 2);
        assert_eq!(err.found.as_deref(), Some("'}'"));

        let err = parse("function (A[N]) -> (B) { B[i] = +(A[i] $ ); }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Lexer);
    }
}
