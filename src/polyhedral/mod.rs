//! Affine building blocks shared by the IR, tiling and access analysis.
//!
//! - Affine expressions over named indices
//! - Tile constraints over positional index vectors

pub mod expr;
pub mod constraint;

pub use expr::Affine;
pub use constraint::TileConstraint;
