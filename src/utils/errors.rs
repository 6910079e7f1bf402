//! Error types for the tile optimizer.
//!
//! Each phase has its own error struct carrying a message and a kind, and
//! `TileOptError` wraps them all for callers that do not care which phase
//! failed.

use thiserror::Error;
use crate::utils::location::Span;
use std::fmt;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum TileOptError {
    /// Error during lexing
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error while lowering a function into blocks
    #[error("Lowering error: {0}")]
    Lower(#[from] LowerError),

    /// Error during a block transformation
    #[error("Transformation error: {0}")]
    Transform(#[from] TransformError),

    /// Error during access analysis
    #[error("Access analysis error: {0}")]
    Access(#[from] AccessError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during lexical analysis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct LexerError {
    pub message: String,
    pub span: Span,
    pub kind: LexerErrorKind,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerErrorKind {
    /// Character outside the language
    UnexpectedChar,
    /// Integer literal out of range
    InvalidNumber,
    /// Block comment never closed
    UnterminatedComment,
}

/// Error during parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub kind: ParseErrorKind,
    /// What was found instead (if applicable)
    pub found: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Lexer failed underneath the parser
    Lexer,
    /// Unexpected token
    UnexpectedToken,
    /// Expected an identifier
    ExpectedIdentifier,
    /// Unknown aggregation or combination operator
    UnknownOperator,
    /// Index expression is not affine in the loop indices
    NonAffineIndex,
    /// Too many operands for a contraction
    TooManyInputs,
}

/// Error while lowering a parsed function into a block tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct LowerError {
    pub message: String,
    pub kind: LowerErrorKind,
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerErrorKind {
    /// No shape was provided for an input tensor
    MissingShape,
    /// Declared rank differs from the provided shape
    RankMismatch,
    /// A dimension name is bound to two different sizes
    DimensionMismatch,
    /// A size expression names an unknown dimension
    UnknownDimension,
    /// An index never addresses a dimension on its own
    UnboundIndex,
    /// A tensor is used before it is defined
    UndefinedTensor,
    /// A derived shape has a stride that does not fit in an `i64`
    ShapeOverflow,
}

/// Error during a block transformation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub message: String,
    pub kind: TransformErrorKind,
    /// The transformation that failed
    pub transform: String,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.transform)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// Wrong number of tile factors, or a zero factor
    InvalidTileSize,
    /// Transformation not applicable to this block
    NotApplicable,
}

/// Error during access pattern analysis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct AccessError {
    pub message: String,
    pub kind: AccessErrorKind,
    /// The tensor being analyzed
    pub tensor: String,
}

impl AccessError {
    pub fn new(kind: AccessErrorKind, tensor: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            tensor: tensor.to_string(),
        }
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (tensor {})", self.message, self.tensor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessErrorKind {
    /// An index expression cannot be expressed over the visible loop indices
    UnsupportedAccessExpression,
    /// A tile factor leaves a partial tile on an index the tensor depends on
    IllTiledAccess,
}

/// Result type using TileOptError.
pub type TileResult<T> = Result<T, TileOptError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::location::SourceLocation;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: "Expected ']'".to_string(),
            span: Span::new(SourceLocation::new(1, 5, 4), SourceLocation::new(1, 6, 5)),
            kind: ParseErrorKind::UnexpectedToken,
            found: Some("';'".to_string()),
        };
        let s = err.to_string();
        assert!(s.contains("Expected ']'"));
        assert!(s.contains("1:5-6"));
        assert!(s.contains("found: ';'"));
    }

    #[test]
    fn test_access_error_wraps() {
        let err = AccessError::new(AccessErrorKind::IllTiledAccess, "A", "range 5 is not a multiple of 2");
        let top: TileOptError = err.into();
        assert!(matches!(top, TileOptError::Access(ref e) if e.kind == AccessErrorKind::IllTiledAccess));
        assert!(top.to_string().contains("tensor A"));
    }
}
