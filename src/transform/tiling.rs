//! Loop tiling of blocks.
//!
//! Tiling splits every loop index of a block into an outer index that steps
//! over tiles and an inner index that walks one tile:
//!
//! ```text
//! block kernel [k:5, m:5, n:5] ( in A[m, k] ... ) { ... }
//! ```
//! becomes, with tile sizes `{2, 2, 2}`:
//! ```text
//! block kernel [k:3, m:3, n:3] ( in A[2*m, 2*k] fp32(2:5, 2:1) ... ) {
//!   block kernel_inner [k:2, m:2, n:2, k_o = k, m_o = m, n_o = n] (
//!     -2*k_o - k + 4 >= 0
//!     ...
//!     in A[m, k] fp32(1:5, 1:1)
//!   ) { ... }
//! }
//! ```
//!
//! The inner block sees the outer tile position through passthrough indices
//! only where a partial last tile has to be cut off by a constraint.

use crate::analysis::access::compute_access;
use crate::analysis::AccessPattern;
use crate::ir::block::{Block, Index, Refinement, Statement};
use crate::polyhedral::Affine;
use crate::transform::Transform;
use crate::utils::errors::{
    AccessError, AccessErrorKind, TileResult, TransformError, TransformErrorKind,
};
use log::{debug, warn};
use num_integer::Integer;
use std::collections::{HashMap, HashSet};

/// Loop tiling transformation.
#[derive(Debug, Clone)]
pub struct Tiling {
    /// One tile size per index of the block, in declaration order
    pub tile_sizes: Vec<u64>,
}

impl Tiling {
    pub fn new(tile_sizes: Vec<u64>) -> Self {
        Self { tile_sizes }
    }

    /// Same tile size for every index of a block with `n_idx` indices.
    pub fn uniform(n_idx: usize, size: u64) -> Self {
        Self { tile_sizes: vec![size; n_idx] }
    }

    fn error(&self, kind: TransformErrorKind, message: String) -> TransformError {
        TransformError { message, kind, transform: self.name().to_string() }
    }

    /// Tile sizes clamped to each index range, after validating them.
    pub fn effective_sizes(&self, block: &Block) -> Result<Vec<u64>, TransformError> {
        if self.tile_sizes.len() != block.idxs.len() {
            return Err(self.error(
                TransformErrorKind::InvalidTileSize,
                format!(
                    "block {} has {} indices but {} tile sizes were given",
                    block.name,
                    block.idxs.len(),
                    self.tile_sizes.len()
                ),
            ));
        }
        let mut sizes = Vec::with_capacity(self.tile_sizes.len());
        for (idx, &tile) in block.idxs.iter().zip(&self.tile_sizes) {
            if tile == 0 {
                return Err(self.error(
                    TransformErrorKind::InvalidTileSize,
                    format!("tile size for index {} must be positive", idx.name),
                ));
            }
            if !idx.is_fresh() && tile != 1 {
                return Err(self.error(
                    TransformErrorKind::NotApplicable,
                    format!("index {} is offset by {} and cannot be tiled", idx.name, idx.affine),
                ));
            }
            sizes.push(tile.min(idx.range.max(1)));
        }
        Ok(sizes)
    }

    /// Split `block` into an outer block stepping over tiles and an inner
    /// block walking one tile. The input block is left untouched.
    pub fn tile_block(&self, block: &Block) -> Result<Block, TransformError> {
        let sizes = self.effective_sizes(block)?;
        let taken: HashSet<&str> = block.idxs.iter().map(|i| i.name.as_str()).collect();

        let mut outer = Block::new(&block.name);
        let mut inner = Block::new(&format!("{}_inner", block.name));
        inner.stmts = block.stmts.clone();

        // Indices mentioned by existing constraints need the outer position too.
        let constrained: HashSet<&str> = block.constraints.iter().flat_map(|c| c.names()).collect();

        // x -> tile * x, applied to outer accesses
        let mut scale = HashMap::new();
        // x -> tile * x_o + x, applied to constraints moved into the inner block
        let mut split = HashMap::new();
        let mut passthroughs = Vec::new();
        let mut bounds = Vec::new();

        for (idx, &tile) in block.idxs.iter().zip(&sizes) {
            if !idx.is_fresh() {
                outer.idxs.push(idx.clone());
                passthroughs.push(Index::passthrough(&idx.name, Affine::var(&idx.name)));
                continue;
            }
            let (tile_i, range_i) = match (i64::try_from(tile), i64::try_from(idx.range)) {
                (Ok(t), Ok(r)) => (t, r),
                _ => {
                    return Err(self.error(
                        TransformErrorKind::InvalidTileSize,
                        format!("index {} with range {} is too large to tile", idx.name, idx.range),
                    ))
                }
            };
            outer.idxs.push(Index::new(&idx.name, Integer::div_ceil(&idx.range, &tile)));
            inner.idxs.push(Index::new(&idx.name, tile));
            scale.insert(idx.name.clone(), Affine::term(&idx.name, tile_i));

            let partial = idx.range % tile != 0;
            if partial || constrained.contains(idx.name.as_str()) {
                let outer_name = unique_name(&format!("{}_o", idx.name), &taken);
                passthroughs.push(Index::passthrough(&outer_name, Affine::var(&idx.name)));
                let global = Affine::term(&outer_name, tile_i) + Affine::var(&idx.name);
                if partial {
                    debug!("index {}: range {} leaves a partial tile of {}", idx.name, idx.range, tile);
                    bounds.push(Affine::constant(range_i - 1) - global.clone());
                }
                split.insert(idx.name.clone(), global);
            }
        }
        inner.idxs.extend(passthroughs);

        for con in &block.constraints {
            inner.constraints.push(con.substitute(&split));
        }
        inner.constraints.extend(bounds);

        let fresh: HashSet<&str> = block.idxs
            .iter()
            .filter(|i| i.is_fresh())
            .map(|i| i.name.as_str())
            .collect();
        for r in &block.refs {
            let (outer_ref, inner_ref) = split_refinement(r, &scale, &fresh, block, &sizes)
                .ok_or_else(|| {
                    self.error(
                        TransformErrorKind::InvalidTileSize,
                        format!("tile of {} into {} is too large for its shape", r.from, r.into),
                    )
                })?;
            outer.refs.push(outer_ref);
            inner.refs.push(inner_ref);
        }

        outer.stmts.push(Statement::Block(Box::new(inner)));
        Ok(outer)
    }
}

impl Transform for Tiling {
    fn apply(&self, block: &Block) -> Result<Block, TransformError> {
        self.tile_block(block)
    }

    fn name(&self) -> &str {
        "tiling"
    }
}

/// Split one refinement into the outer tile view and the inner element view.
///
/// Returns `None` if the grown outer view does not fit in a `u64`.
fn split_refinement(
    r: &Refinement,
    scale: &HashMap<String, Affine>,
    fresh: &HashSet<&str>,
    block: &Block,
    sizes: &[u64],
) -> Option<(Refinement, Refinement)> {
    let tile_of: HashMap<&str, u64> = block.idxs
        .iter()
        .zip(sizes)
        .map(|(i, &t)| (i.name.as_str(), t))
        .collect();

    let mut outer = r.clone();
    outer.access = r.access.iter().map(|a| a.substitute(scale)).collect();
    for (dim, expr) in outer.shape.dims.iter_mut().zip(&r.access) {
        // Grow the view by the distance the inner indices can move it.
        let mut growth: u64 = 0;
        for (name, c) in expr.terms().filter(|(name, _)| fresh.contains(name)) {
            let steps = tile_of.get(name).copied().unwrap_or(1) - 1;
            growth = growth.checked_add(c.unsigned_abs().checked_mul(steps)?)?;
        }
        dim.size = dim.size.checked_add(growth)?;
    }

    let mut inner = r.clone();
    inner.from = r.into.clone();
    inner.access = r.access
        .iter()
        .map(|a| a.filter_terms(|name| fresh.contains(name)).without_constant())
        .collect();
    Some((outer, inner))
}

fn unique_name(base: &str, taken: &HashSet<&str>) -> String {
    let mut name = base.to_string();
    while taken.contains(name.as_str()) {
        name.push_str("_o");
    }
    name
}

/// Tile `block` with one tile size per index, returning the outer block.
pub fn apply_tile(block: &Block, tile_sizes: &[u64]) -> Result<Block, TransformError> {
    Tiling::new(tile_sizes.to_vec()).apply(block)
}

/// Check that tiling `block` keeps every reference to `tensor` free of
/// partial tiles, then return the access patterns of the tiled block.
///
/// Fails with `IllTiledAccess` if an index the tensor moves with has a range
/// that is not a multiple of its tile size.
pub fn validate_tiling(block: &Block, tensor: &str, tile_sizes: &[u64]) -> TileResult<Vec<AccessPattern>> {
    let tiling = Tiling::new(tile_sizes.to_vec());
    let sizes = tiling.effective_sizes(block)?;
    let untiled = compute_access(block, tensor)?;

    // The block's own fresh indices are the first collected slots, in order.
    let own: Vec<(&Index, u64)> = block.idxs
        .iter()
        .zip(sizes)
        .filter(|(i, _)| i.is_fresh() || i.range > 1)
        .collect();
    for pattern in &untiled {
        for ((idx, tile), stride) in own.iter().zip(&pattern.strides) {
            if stride.stride != 0 && idx.range % tile != 0 {
                warn!(
                    "tiling {} by {} leaves a partial tile of {} on {}",
                    idx.name, tile, idx.range % tile, tensor
                );
                return Err(AccessError::new(
                    AccessErrorKind::IllTiledAccess,
                    tensor,
                    format!(
                        "index {} has range {}, which is not a multiple of tile size {}",
                        idx.name, idx.range, tile
                    ),
                )
                .into());
            }
        }
    }

    let tiled = tiling.apply(block)?;
    Ok(compute_access(&tiled, tensor)?)
}
