//! Block transformations.

pub mod tiling;

pub use tiling::{apply_tile, validate_tiling, Tiling};

use crate::ir::block::Block;
use crate::utils::errors::TransformError;

/// A transformation producing a new block from an existing one.
///
/// Transformations never mutate their input, so analyses can keep running
/// on the original block while the transformed one is inspected.
pub trait Transform {
    /// Apply the transformation.
    fn apply(&self, block: &Block) -> Result<Block, TransformError>;

    /// Get transformation name.
    fn name(&self) -> &str;
}
