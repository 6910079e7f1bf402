//! Frontend: lexer, parser and AST for the contraction language.
//!
//! ## Language Overview
//!
//! A function lists its inputs with symbolic dimensions, its outputs, and a
//! body of contractions. Each contraction aggregates (`+`, `*`, `>`, `<`,
//! `=`) the combination of at most two indexed inputs over every index
//! value:
//!
//! ```text
//! function (A[M, K], B[K, N]) -> (C) {
//!     C[m, n : M, N] = +(A[m, k] * B[k, n]);
//! }
//! ```
//!
//! Index expressions must be affine in the loop indices.

pub mod token;
pub mod lexer;
pub mod ast;
pub mod parser;

// Re-exports
pub use lexer::Lexer;
pub use parser::Parser;
pub use ast::*;
pub use token::{Token, TokenKind};
pub use crate::utils::errors::ParseError;

/// Parse source code into a function.
pub fn parse(source: &str) -> Result<Function, ParseError> {
    let lexer = Lexer::new(source);
    let mut parser = Parser::new(lexer)?;
    parser.parse_function()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let source = r#"
            // element-wise copy
            function (A[N]) -> (B) {
                B[i : N] = =(A[i]);
            }
        "#;
        let func = parse(source).unwrap();
        assert_eq!(func.contractions.len(), 1);
        assert_eq!(func.contractions[0].to_string(), "B[i : N] = =(A[i])");
    }

    #[test]
    fn test_display_round_trip() {
        let func = parse("function (A[M, K], B[K, N]) -> (C) { C[m, n : M, N] = +(A[m, k] * B[k, n]); }").unwrap();
        let text = func.contractions[0].to_string();
        assert_eq!(text, "C[m, n : M, N] = +(A[m, k] * B[k, n])");
    }
}
