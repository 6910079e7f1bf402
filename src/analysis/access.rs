//! Access pattern analysis for tensor loop nests.
//!
//! Given a block and a tensor name, the analyzer walks from the block down
//! through its nested blocks, following the refinements of the tensor, and
//! describes every load or store that reaches it as an [`AccessPattern`]:
//!
//! - the loop indices collected on the way down (outermost block first), each
//!   with its trip count and the stride by which the tensor's flat offset
//!   moves when the index advances by one;
//! - the constant base offset;
//! - the block constraints on the way down, as linear bounds over the
//!   collected indices.
//!
//! Indices declared above the analyzed block are not visible. Anything that
//! depends on them (the outer tile index of a tiled inner block, typically)
//! is dropped from the result, and the pattern is marked inexact.

use crate::ir::block::{Block, Index, Statement};
use crate::polyhedral::{Affine, TileConstraint};
use crate::utils::errors::{AccessError, AccessErrorKind};
use log::{debug, trace};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::fmt;

/// Stride of one loop index over a tensor's flat storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexStride {
    /// Index name
    pub name: String,
    /// Elements the flat offset moves per unit step of the index
    pub stride: i64,
    /// Trip count of the index
    pub range: u64,
}

impl IndexStride {
    pub fn new(name: &str, stride: i64, range: u64) -> Self {
        Self { name: name.to_string(), stride, range }
    }
}

/// How one reference inside a block traverses a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPattern {
    /// The reference is a store
    pub is_write: bool,
    /// Every constraint and offset term was expressible over visible indices
    pub is_exact: bool,
    /// Flat offset at which the block's iteration starts
    pub base_offset: i64,
    /// One entry per collected index, outermost block first
    pub strides: Vec<IndexStride>,
    /// Bounds the collected indices must respect, e.g. partial tiles
    pub cross_tile_constraints: Vec<TileConstraint>,
}

impl AccessPattern {
    /// Flat offset touched at the given index values.
    pub fn offset_at(&self, values: &[i64]) -> i64 {
        self.base_offset
            + self.strides
                .iter()
                .zip(values)
                .map(|(s, &v)| s.stride * v)
                .sum::<i64>()
    }

    /// Whether all constraints hold at the given index values.
    pub fn is_valid_point(&self, values: &[i64]) -> bool {
        self.cross_tile_constraints.iter().all(|c| c.is_satisfied(values))
    }

    /// Lowest and highest flat offsets reachable by the collected indices,
    /// ignoring constraints. Saturates at the `i64` limits.
    pub fn extent(&self) -> (i64, i64) {
        let mut lo = self.base_offset;
        let mut hi = self.base_offset;
        for s in &self.strides {
            let steps = i64::try_from(s.range.saturating_sub(1)).unwrap_or(i64::MAX);
            let reach = s.stride.saturating_mul(steps);
            if reach > 0 {
                hi = hi.saturating_add(reach);
            } else {
                lo = lo.saturating_add(reach);
            }
        }
        (lo, hi)
    }

    /// Number of storage elements between the lowest and highest offsets.
    /// Saturates at `u64::MAX`.
    pub fn span(&self) -> u64 {
        let (lo, hi) = self.extent();
        hi.abs_diff(lo).saturating_add(1)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.strides.iter().map(|s| s.name.clone()).collect()
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} offset={} [",
            if self.is_write { "write" } else { "read" },
            if self.is_exact { "exact" } else { "inexact" },
            self.base_offset
        )?;
        for (i, s) in self.strides.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}*{}", s.name, s.range, s.stride)?;
        }
        write!(f, "]")?;
        let names = self.index_names();
        for c in &self.cross_tile_constraints {
            write!(f, " {{{}}}", c.to_string_with_names(&names))?;
        }
        Ok(())
    }
}

/// A linear form over collected index slots plus a constant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Linear {
    constant: i64,
    coeffs: Vec<i64>,
}

impl Linear {
    fn coeff(&self, slot: usize) -> i64 {
        self.coeffs.get(slot).copied().unwrap_or(0)
    }

    /// `self += other * factor`, failing on overflow.
    fn add_scaled(&mut self, other: &Linear, factor: i64) -> Option<()> {
        self.constant = self.constant.checked_add(other.constant.checked_mul(factor)?)?;
        if self.coeffs.len() < other.coeffs.len() {
            self.coeffs.resize(other.coeffs.len(), 0);
        }
        for (dst, &src) in self.coeffs.iter_mut().zip(&other.coeffs) {
            *dst = dst.checked_add(src.checked_mul(factor)?)?;
        }
        Some(())
    }
}

/// What an index name stands for inside a block.
#[derive(Debug, Clone, Default)]
struct Binding {
    /// Part expressible over collected slots
    known: Linear,
    /// Depends on an index above the analyzed block
    opaque: bool,
}

/// An affine expression resolved against a block scope.
struct Resolved {
    linear: Linear,
    opaque: bool,
}

/// State carried down the block tree for one view of the tensor.
#[derive(Debug, Clone)]
struct Walk<'a> {
    tensor: &'a str,
    /// Collected indices: name and range
    slots: Vec<(String, u64)>,
    /// Bindings of the current block's index names
    scope: HashMap<String, Binding>,
    constraints: Vec<TileConstraint>,
    offset: Result<Linear, AccessError>,
    is_exact: bool,
}

impl<'a> Walk<'a> {
    fn root(tensor: &'a str) -> Self {
        Self {
            tensor,
            slots: Vec::new(),
            scope: HashMap::new(),
            constraints: Vec::new(),
            offset: Ok(Linear::default()),
            is_exact: true,
        }
    }

    fn unsupported(&self, message: String) -> AccessError {
        AccessError::new(AccessErrorKind::UnsupportedAccessExpression, self.tensor, message)
    }

    /// Resolve `expr` against the current scope.
    ///
    /// Names missing from the scope are opaque when `missing_is_opaque` is set
    /// and an error otherwise.
    fn resolve(&self, expr: &Affine, missing_is_opaque: bool) -> Result<Resolved, AccessError> {
        let mut linear = Linear { constant: expr.constant, coeffs: Vec::new() };
        let mut opaque = false;
        for (name, coeff) in expr.terms() {
            match self.scope.get(name) {
                Some(binding) => {
                    linear
                        .add_scaled(&binding.known, coeff)
                        .ok_or_else(|| self.unsupported(format!("overflow resolving '{}'", expr)))?;
                    opaque |= binding.opaque;
                }
                None if missing_is_opaque => opaque = true,
                None => {
                    return Err(self.unsupported(format!(
                        "'{}' refers to index '{}', which is not bound in this block",
                        expr, name
                    )))
                }
            }
        }
        Ok(Resolved { linear, opaque })
    }

    /// Bind the block's indices, collecting a slot for each loop it introduces.
    fn bind_indices(&mut self, idxs: &[Index]) {
        let mut scope = HashMap::with_capacity(idxs.len());
        for idx in idxs {
            // Index offsets refer to the parent block, whose scope is still current.
            let base = match self.resolve(&idx.affine, true) {
                Ok(r) => Binding { known: r.linear, opaque: r.opaque },
                Err(e) => {
                    if self.offset.is_ok() {
                        self.offset = Err(e);
                    }
                    Binding::default()
                }
            };
            let binding = if idx.is_fresh() || idx.range > 1 {
                let slot = self.slots.len();
                self.slots.push((idx.name.clone(), idx.range));
                // Earlier slots only, so the new coefficient starts at zero.
                let mut known = base.known;
                if known.coeffs.len() <= slot {
                    known.coeffs.resize(slot + 1, 0);
                }
                known.coeffs[slot] = 1;
                Binding { known, opaque: base.opaque }
            } else {
                base
            };
            trace!("bind {} -> {:?}", idx.name, binding);
            scope.insert(idx.name.clone(), binding);
        }
        self.scope = scope;
    }

    /// Turn `expr >= 0` into `-linear < constant + 1`.
    fn add_constraint(&mut self, expr: &Affine) {
        match self.resolve(expr, false) {
            Ok(r) if r.opaque => {
                debug!("constraint {} >= 0 depends on outer indices, access is inexact", expr);
                self.is_exact = false;
            }
            Ok(r) => {
                let coeffs = r.linear.coeffs.iter().map(|c| -c).collect();
                self.constraints.push(TileConstraint::new(coeffs, r.linear.constant + 1));
            }
            Err(e) => self.offset = Err(e),
        }
    }

    /// Move the tensor offset by a refinement's access.
    fn refine(&mut self, access: &[Affine], strides: &[i64]) {
        if access.len() != strides.len() {
            let err = self.unsupported(format!(
                "refinement has {} access expressions for {} dimensions",
                access.len(),
                strides.len()
            ));
            self.offset = Err(err);
            return;
        }
        for (expr, &stride) in access.iter().zip(strides) {
            let resolved = match self.resolve(expr, false) {
                Ok(r) => r,
                Err(e) => {
                    self.offset = Err(e);
                    return;
                }
            };
            if resolved.opaque {
                debug!("access {} depends on outer indices, access is inexact", expr);
                self.is_exact = false;
            }
            let overflow = self.unsupported(format!("overflow scaling '{}' by stride {}", expr, stride));
            if let Ok(offset) = self.offset.as_mut() {
                if offset.add_scaled(&resolved.linear, stride).is_none() {
                    self.offset = Err(overflow);
                    return;
                }
            }
        }
    }

    fn emit(&self, is_write: bool) -> Result<AccessPattern, AccessError> {
        let offset = self.offset.clone()?;
        let n = self.slots.len();
        let strides = self.slots
            .iter()
            .enumerate()
            .map(|(slot, (name, range))| IndexStride::new(name, offset.coeff(slot), *range))
            .collect();
        Ok(AccessPattern {
            is_write,
            is_exact: self.is_exact,
            base_offset: offset.constant,
            strides,
            cross_tile_constraints: self.constraints.iter().map(|c| c.padded(n)).collect(),
        })
    }

    /// Analyze `block`, where `buffer` names the tensor in the block's parent scope.
    fn visit(&self, block: &Block, buffer: &str, out: &mut Vec<Result<AccessPattern, AccessError>>) {
        let mut walk = self.clone();
        walk.bind_indices(&block.idxs);
        for con in &block.constraints {
            walk.add_constraint(con);
        }

        let mut views: Vec<(&str, Walk)> = Vec::new();
        for r in block.refs.iter().filter(|r| r.refines(buffer)) {
            let mut view = walk.clone();
            view.refine(&r.access, &r.shape.strides());
            views.push((r.into.as_str(), view));
        }
        if views.is_empty() {
            if block.refs.iter().any(|r| r.into == buffer) {
                trace!("{} is shadowed in block {}", buffer, block.name);
                return;
            }
            views.push((buffer, walk));
        }

        for stmt in &block.stmts {
            for (view_name, view) in &views {
                match stmt {
                    Statement::Load { from, .. } if from == view_name => out.push(view.emit(false)),
                    Statement::Store { into, .. } if into == view_name => out.push(view.emit(true)),
                    Statement::Block(inner) => view.visit(inner, view_name, out),
                    _ => {}
                }
            }
        }
    }
}

/// Compute the access pattern of every reference to `tensor` in `block`,
/// one result per reference.
///
/// A reference whose index expressions cannot be resolved yields an error
/// without affecting the other references.
pub fn compute_access_each(block: &Block, tensor: &str) -> Vec<Result<AccessPattern, AccessError>> {
    let mut out = Vec::new();
    Walk::root(tensor).visit(block, tensor, &mut out);
    debug!("block {}: {} reference(s) to {}", block.name, out.len(), tensor);
    out
}

/// Compute the access pattern of every reference to `tensor` in `block`.
///
/// Returns an empty vector if the tensor is not referenced. Fails with the
/// first unsupported reference.
pub fn compute_access(block: &Block, tensor: &str) -> Result<Vec<AccessPattern>, AccessError> {
    compute_access_each(block, tensor).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::{RefDir, Refinement};
    use crate::ir::shape::{DataType, TensorShape};

    fn view(sizes: &[u64]) -> TensorShape {
        TensorShape::simple(DataType::Float32, sizes).with_uniform_size(1)
    }

    fn load(from: &str) -> Statement {
        Statement::Load { from: from.to_string(), into: format!("${}", from) }
    }

    fn store(into: &str) -> Statement {
        Statement::Store { from: format!("${}", into), into: into.to_string() }
    }

    /// C[m, n] += A[m, k] * B[k, n] over 5x5 tensors, before tiling.
    fn matmul_kernel() -> Block {
        let mut kernel = Block::new("kernel");
        for name in ["k", "m", "n"] {
            kernel.idxs.push(Index::new(name, 5));
        }
        let v = |a: &str, b: &str| vec![Affine::var(a), Affine::var(b)];
        kernel.refs.push(Refinement::new(RefDir::In, "A", "A", v("m", "k"), view(&[5, 5])));
        kernel.refs.push(Refinement::new(RefDir::In, "B", "B", v("k", "n"), view(&[5, 5])));
        kernel.refs.push(Refinement::new(RefDir::Out, "C", "C", v("m", "n"), view(&[5, 5])));
        kernel.stmts.push(load("A"));
        kernel.stmts.push(load("B"));
        kernel.stmts.push(Statement::Intrinsic {
            name: "mul".into(),
            inputs: vec!["$A".into(), "$B".into()],
            outputs: vec!["$C".into()],
        });
        kernel.stmts.push(store("C"));
        kernel
    }

    #[test]
    fn test_untiled_strides() {
        let access = compute_access(&matmul_kernel(), "A").unwrap();
        assert_eq!(access, vec![AccessPattern {
            is_write: false,
            is_exact: true,
            base_offset: 0,
            strides: vec![
                IndexStride::new("k", 1, 5),
                IndexStride::new("m", 5, 5),
                IndexStride::new("n", 0, 5),
            ],
            cross_tile_constraints: vec![],
        }]);
    }

    #[test]
    fn test_write_reference() {
        let access = compute_access(&matmul_kernel(), "C").unwrap();
        assert_eq!(access.len(), 1);
        assert!(access[0].is_write);
        let strides: Vec<i64> = access[0].strides.iter().map(|s| s.stride).collect();
        assert_eq!(strides, vec![0, 5, 1]);
    }

    #[test]
    fn test_unknown_tensor_is_empty() {
        assert!(compute_access(&matmul_kernel(), "Z").unwrap().is_empty());
    }

    #[test]
    fn test_scalar_block() {
        let mut block = Block::new("scalar");
        let shape = view(&[4, 6]);
        block.refs.push(Refinement::new(
            RefDir::In, "X", "X", vec![Affine::constant(2), Affine::constant(3)], shape,
        ));
        block.stmts.push(load("X"));
        let access = compute_access(&block, "X").unwrap();
        assert_eq!(access.len(), 1);
        assert!(access[0].strides.is_empty());
        assert_eq!(access[0].base_offset, 15);
        assert_eq!(access[0].span(), 1);
    }

    #[test]
    fn test_unbound_index_fails_only_that_reference() {
        let mut block = matmul_kernel();
        block.refs.push(Refinement::new(
            RefDir::In, "A", "A2", vec![Affine::var("q"), Affine::var("k")], view(&[5, 5]),
        ));
        block.stmts.push(load("A2"));
        let results = compute_access_each(&block, "A");
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.kind, AccessErrorKind::UnsupportedAccessExpression);
        assert!(compute_access(&block, "A").is_err());
    }

    #[test]
    fn test_shadowed_buffer() {
        let mut block = Block::new("alloc");
        block.refs.push(Refinement::declare(RefDir::None, "A", TensorShape::simple(DataType::Float32, &[3])));
        let mut inner = matmul_kernel();
        inner.name = "kernel".into();
        block.stmts.push(Statement::Block(Box::new(inner)));
        // The local declaration is what the kernel sees; analyzing it from here
        // describes the local buffer.
        let access = compute_access(&block, "A").unwrap();
        assert_eq!(access.len(), 1);
        // A block-local allocation shadows any parent buffer of the same name
        // when another name is analyzed through it.
        let mut shadow = Block::new("shadow");
        shadow.refs.push(Refinement::new(RefDir::None, "tmp", "A", vec![], TensorShape::scalar(DataType::Float32)));
        shadow.stmts.push(load("A"));
        assert!(compute_access(&shadow, "A").unwrap().is_empty());
    }

    #[test]
    fn test_opaque_offset_is_inexact() {
        let mut block = Block::new("inner");
        block.idxs.push(Index::new("i", 4));
        block.idxs.push(Index::passthrough("j", Affine::var("outer_j")));
        block.refs.push(Refinement::new(
            RefDir::In, "X", "X", vec![Affine::var("j"), Affine::var("i")], view(&[8, 4]),
        ));
        block.stmts.push(load("X"));
        let access = compute_access(&block, "X").unwrap();
        assert!(!access[0].is_exact);
        assert_eq!(access[0].strides, vec![IndexStride::new("i", 1, 4)]);
    }

    #[test]
    fn test_constraint_conversion() {
        // i + j <= 4  <=>  4 - i - j >= 0  <=>  i + j < 5
        let mut block = Block::new("tri");
        block.idxs.push(Index::new("i", 5));
        block.idxs.push(Index::new("j", 5));
        block.constraints.push(Affine::constant(4) - Affine::var("i") - Affine::var("j"));
        block.refs.push(Refinement::new(
            RefDir::In, "X", "X", vec![Affine::var("i"), Affine::var("j")], view(&[5, 5]),
        ));
        block.stmts.push(load("X"));
        let access = compute_access(&block, "X").unwrap();
        assert_eq!(access[0].cross_tile_constraints, vec![TileConstraint::new(vec![1, 1], 5)]);
        assert!(access[0].is_valid_point(&[2, 2]));
        assert!(!access[0].is_valid_point(&[3, 2]));
        assert_eq!(access[0].offset_at(&[3, 1]), 16);
    }

    #[test]
    fn test_overflowing_index_offset_is_an_error() {
        // q = 2 * p = 2 * i64::MAX * x
        let mut inner = Block::new("inner");
        inner.idxs.push(Index::passthrough("q", Affine::term("p", 2)));
        inner.stmts.push(load("X"));
        let mut mid = Block::new("mid");
        mid.idxs.push(Index::passthrough("p", Affine::term("x", i64::MAX)));
        mid.stmts.push(Statement::Block(Box::new(inner)));
        let mut block = Block::new("outer");
        block.idxs.push(Index::new("x", 4));
        block.stmts.push(Statement::Block(Box::new(mid)));

        let results = compute_access_each(&block, "X");
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.kind, AccessErrorKind::UnsupportedAccessExpression);
        assert_eq!(err.tensor, "X");
    }

    #[test]
    fn test_extent_saturates() {
        let pattern = AccessPattern {
            is_write: false,
            is_exact: true,
            base_offset: 0,
            strides: vec![
                IndexStride::new("i", i64::MAX, u64::MAX),
                IndexStride::new("j", i64::MIN, 3),
            ],
            cross_tile_constraints: vec![],
        };
        assert_eq!(pattern.extent(), (i64::MIN, i64::MAX));
        assert_eq!(pattern.span(), u64::MAX);

        let small = AccessPattern {
            strides: vec![IndexStride::new("i", -2, 4)],
            base_offset: 10,
            ..pattern
        };
        assert_eq!(small.extent(), (4, 10));
        assert_eq!(small.span(), 7);
    }

    #[test]
    fn test_idempotent() {
        let kernel = matmul_kernel();
        assert_eq!(compute_access(&kernel, "B").unwrap(), compute_access(&kernel, "B").unwrap());
    }
}
