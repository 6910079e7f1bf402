//! Utility modules for the tile optimizer.
//!
//! - Error types
//! - Source location tracking
//! - Pretty printing of block trees

pub mod errors;
pub mod location;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use location::{SourceLocation, Span};
pub use pretty::PrettyPrint;
