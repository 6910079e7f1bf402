//! # TileOpt - Access Pattern Analysis for Tensor Loop Nests
//!
//! A small framework for reasoning about how tensor contractions traverse
//! memory:
//! - A frontend for contraction functions (`C[m, n] = +(A[m, k] * B[k, n])`)
//! - Lowering into a tree of loop-nest blocks over refined tensor views
//! - Tiling of kernel blocks into outer/inner block pairs
//! - Access pattern analysis: per-index strides, base offsets and the
//!   constraints partial tiles impose on the iteration space
//!
//! ## Architecture
//!
//! ```text
//! Source → Frontend → Block IR → (Tiling) → Access Analysis → Report
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tileopt::prelude::*;
//!
//! let info = RunInfo::new("function (A[M, K], B[K, N]) -> (C) { C[m, n : M, N] = +(A[m, k] * B[k, n]); }")
//!     .with_input("A", "f32:5x5".parse()?)
//!     .with_input("B", "f32:5x5".parse()?);
//! let program = tileopt::lower("matmul", &info)?;
//! let config = AnalysisConfig { tile_sizes: Some(vec![2, 2, 2]), ..Default::default() };
//! let report = tileopt::analyze(&program, &config)?;
//! println!("{}", report);
//! ```

#![warn(clippy::all)]

pub mod frontend;
pub mod ir;
pub mod polyhedral;
pub mod analysis;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::frontend::{parse, Function, ParseError};
    pub use crate::ir::{
        AggOp, Block, DataType, Index, Program, RefDir, Refinement, RunInfo, Statement,
        TensorShape, generate_program,
    };
    pub use crate::polyhedral::{Affine, TileConstraint};
    pub use crate::analysis::{compute_access, compute_access_each, AccessPattern, IndexStride};
    pub use crate::transform::{apply_tile, validate_tiling, Tiling, Transform};
    pub use crate::utils::errors::*;
    pub use crate::utils::PrettyPrint;
    pub use crate::{AnalysisConfig, AnalysisReport};
}

use analysis::AccessPattern;
use anyhow::{anyhow, Context, Result};
use ir::{Block, Program, RunInfo};
use log::{debug, info};
use serde::{Serialize, Deserialize};
use std::fmt;

/// Main entry point for parsing source code.
pub fn parse(source: &str) -> Result<frontend::Function> {
    Ok(frontend::parse(source)?)
}

/// Parse and lower a function into a program named `name`.
pub fn lower(name: &str, info: &RunInfo) -> Result<Program> {
    ir::generate_program(name, info).with_context(|| format!("Failed to lower {}", name))
}

/// Configuration for the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Position of the kernel inside `main`
    pub kernel: usize,
    /// Tile sizes, one per kernel index (no tiling if `None`)
    pub tile_sizes: Option<Vec<u64>>,
    /// Tensors to analyze; empty means every tensor the kernel refines
    pub tensors: Vec<String>,
    /// Reject tile sizes that leave partial tiles on an accessed index
    pub strict_tiling: bool,
    /// Verbosity level (0-3)
    pub verbosity: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            kernel: 0,
            tile_sizes: None,
            tensors: Vec::new(),
            strict_tiling: false,
            verbosity: 1,
        }
    }
}

/// Access patterns of one tensor at one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorReport {
    pub tensor: String,
    pub patterns: Vec<AccessPattern>,
}

/// Access patterns computed at one level of the kernel's nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelReport {
    pub block: String,
    pub depth: usize,
    pub tensors: Vec<TensorReport>,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub program: String,
    pub kernel: String,
    pub tile_sizes: Option<Vec<u64>>,
    /// The analyzed kernel, after tiling if requested
    pub block: Block,
    /// Outermost level first
    pub levels: Vec<LevelReport>,
}

impl AnalysisReport {
    /// Patterns for `tensor` at the level named `block`.
    pub fn patterns(&self, block: &str, tensor: &str) -> Option<&[AccessPattern]> {
        self.levels
            .iter()
            .find(|l| l.block == block)?
            .tensors
            .iter()
            .find(|t| t.tensor == tensor)
            .map(|t| t.patterns.as_slice())
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.program, self.kernel)?;
        if let Some(ref sizes) = self.tile_sizes {
            let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
            write!(f, " tiled by [{}]", sizes.join(", "))?;
        }
        writeln!(f)?;
        for level in &self.levels {
            writeln!(f, "{}{}:", "  ".repeat(level.depth), level.block)?;
            for t in &level.tensors {
                for p in &t.patterns {
                    writeln!(f, "{}  {}: {}", "  ".repeat(level.depth), t.tensor, p)?;
                }
            }
        }
        Ok(())
    }
}

/// Every view `block` gives to any of the parent buffers `buffers`.
fn view_names(block: &Block, buffers: &[String]) -> Vec<String> {
    let mut views: Vec<String> = Vec::new();
    for r in block.refs.iter().filter(|r| buffers.iter().any(|b| r.refines(b))) {
        if !views.contains(&r.into) {
            views.push(r.into.clone());
        }
    }
    views
}

/// Tensors the kernel refines from its parent, in declaration order.
fn refined_tensors(kernel: &Block) -> Vec<String> {
    let mut tensors: Vec<String> = Vec::new();
    for r in kernel.refs.iter().filter(|r| !r.is_declaration()) {
        if !tensors.contains(&r.from) {
            tensors.push(r.from.clone());
        }
    }
    tensors
}

/// Run the analysis pipeline on one kernel of `program`.
///
/// The kernel is tiled first if `config.tile_sizes` is set. Access patterns
/// are computed for the kernel and for every block nested under it, with
/// tensor names followed through each level's refinements.
pub fn analyze(program: &Program, config: &AnalysisConfig) -> Result<AnalysisReport> {
    let kernel = program
        .kernel(config.kernel)
        .ok_or_else(|| anyhow!("{} has no kernel {}", program.name, config.kernel))?;
    info!("Analyzing {}::{}", program.name, kernel.name);

    let tensors = if config.tensors.is_empty() {
        refined_tensors(kernel)
    } else {
        config.tensors.clone()
    };
    debug!("Tensors: {:?}", tensors);

    let block = match config.tile_sizes {
        Some(ref sizes) => {
            if config.strict_tiling {
                for tensor in &tensors {
                    transform::validate_tiling(kernel, tensor, sizes)
                        .with_context(|| format!("Tiling {} by {:?} is not exact", kernel.name, sizes))?;
                }
            }
            transform::apply_tile(kernel, sizes)
                .with_context(|| format!("Failed to tile {}", kernel.name))?
        }
        None => kernel.clone(),
    };

    let mut levels = Vec::new();
    // A tensor may be refined into several views; each one is followed.
    let mut names: Vec<Vec<String>> = tensors.iter().map(|t| vec![t.clone()]).collect();
    for (depth, level) in block.nest().into_iter().enumerate() {
        let mut reports = Vec::new();
        for (tensor, views) in tensors.iter().zip(&names) {
            if views.is_empty() {
                continue;
            }
            let mut patterns = Vec::new();
            for view in views {
                let found = analysis::compute_access(level, view)
                    .with_context(|| format!("Failed to analyze {} in {}", tensor, level.name))?;
                patterns.extend(found);
            }
            reports.push(TensorReport { tensor: tensor.clone(), patterns });
        }
        levels.push(LevelReport { block: level.name.clone(), depth, tensors: reports });
        names = names.iter().map(|views| view_names(level, views)).collect();
    }

    Ok(AnalysisReport {
        program: program.name.clone(),
        kernel: kernel.name.clone(),
        tile_sizes: config.tile_sizes.clone(),
        block,
        levels,
    })
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
