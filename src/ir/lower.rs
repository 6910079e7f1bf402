//! Function to block-tree lowering.
//!
//! Each contraction becomes one kernel block nested in `main`:
//! - the kernel iterates every index named by the contraction, sorted by name
//! - each index ranges over the smallest dimension it addresses on its own
//! - accesses that can leave their tensor are guarded by constraints
//! - inputs are refined as single-element `in` views, the output as an
//!   `out` view carrying the aggregation op
//!
//! `main` refines every tensor of the function and allocates temporaries;
//! the root block declares the user-visible buffers.

use std::collections::{BTreeMap, HashMap};
use crate::frontend::{self, ast::{Contraction, Function, SizeExpr, TensorAccess}};
use crate::ir::block::{Block, Index, Program, RefDir, Refinement, Statement};
use crate::ir::shape::{DataType, TensorShape};
use crate::polyhedral::Affine;
use crate::utils::errors::{LowerError, LowerErrorKind, TileResult};
use log::{debug, trace};

/// Source code plus the concrete shapes of its inputs and outputs.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub code: String,
    pub input_shapes: BTreeMap<String, TensorShape>,
    pub output_shapes: BTreeMap<String, TensorShape>,
}

impl RunInfo {
    pub fn new(code: &str) -> Self {
        Self { code: code.to_string(), ..Default::default() }
    }

    pub fn with_input(mut self, name: &str, shape: TensorShape) -> Self {
        self.input_shapes.insert(name.to_string(), shape);
        self
    }

    pub fn with_output(mut self, name: &str, shape: TensorShape) -> Self {
        self.output_shapes.insert(name.to_string(), shape);
        self
    }
}

/// Parse `info.code` and lower it into a program named `name`.
pub fn generate_program(name: &str, info: &RunInfo) -> TileResult<Program> {
    let func = frontend::parse(&info.code)?;
    Ok(lower_function(name, &func, info)?)
}

/// Lower a parsed function into a program.
pub fn lower_function(name: &str, func: &Function, info: &RunInfo) -> Result<Program, LowerError> {
    let mut ctx = LoweringContext::new(info);
    for param in &func.inputs {
        ctx.bind_input(&param.name, &param.dims)?;
    }

    let mut main = Block::new("main");
    for (i, contraction) in func.contractions.iter().enumerate() {
        let kernel = ctx.lower_contraction(&format!("kernel_{}", i), contraction)?;
        main.stmts.push(Statement::Block(Box::new(kernel)));
    }

    for output in &func.outputs {
        if ctx.shape(output).is_none() {
            return Err(lower_error(
                LowerErrorKind::UndefinedTensor,
                format!("Output {} is never computed", output),
            ));
        }
    }

    let mut root = Block::new(name);
    for (tensor, shape) in &ctx.tensors {
        let access = vec![Affine::zero(); shape.rank()];
        if func.input(tensor).is_some() {
            root.refs.push(Refinement::declare(RefDir::None, tensor, shape.clone()));
            main.refs.push(Refinement::new(RefDir::In, tensor, tensor, access, shape.clone()));
        } else if func.is_output(tensor) {
            root.refs.push(Refinement::declare(RefDir::None, tensor, shape.clone()));
            main.refs.push(Refinement::new(RefDir::Out, tensor, tensor, access, shape.clone()));
        } else {
            debug!("Allocating temporary {} {}", tensor, shape);
            main.refs.push(Refinement::declare(RefDir::None, tensor, shape.clone()));
        }
    }
    root.stmts.push(Statement::Block(Box::new(main)));

    Ok(Program { name: name.to_string(), root })
}

/// Tracks dimension bindings and tensor shapes while lowering.
struct LoweringContext<'a> {
    info: &'a RunInfo,
    dims: HashMap<String, u64>,
    /// Tensors in definition order
    tensors: Vec<(String, TensorShape)>,
}

impl<'a> LoweringContext<'a> {
    fn new(info: &'a RunInfo) -> Self {
        Self { info, dims: HashMap::new(), tensors: Vec::new() }
    }

    fn shape(&self, tensor: &str) -> Option<&TensorShape> {
        self.tensors.iter().find(|(n, _)| n == tensor).map(|(_, s)| s)
    }

    fn bind_input(&mut self, name: &str, dims: &[SizeExpr]) -> Result<(), LowerError> {
        let shape = self.info.input_shapes.get(name).cloned().ok_or_else(|| {
            lower_error(LowerErrorKind::MissingShape, format!("No shape given for input {}", name))
        })?;
        if !dims.is_empty() && dims.len() != shape.rank() {
            return Err(lower_error(
                LowerErrorKind::RankMismatch,
                format!("Input {} declares {} dimensions but its shape has {}", name, dims.len(), shape.rank()),
            ));
        }
        for (dim, size) in dims.iter().zip(shape.sizes()) {
            match dim {
                SizeExpr::Const(c) if *c != size => {
                    return Err(lower_error(
                        LowerErrorKind::DimensionMismatch,
                        format!("Input {} expects size {} but has {}", name, c, size),
                    ));
                }
                SizeExpr::Const(_) => {}
                SizeExpr::Dim(d) => match self.dims.get(d) {
                    Some(&bound) if bound != size => {
                        return Err(lower_error(
                            LowerErrorKind::DimensionMismatch,
                            format!("Dimension {} is bound to both {} and {}", d, bound, size),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        trace!("Binding {} = {}", d, size);
                        self.dims.insert(d.clone(), size);
                    }
                },
            }
        }
        self.tensors.push((name.to_string(), shape));
        Ok(())
    }

    fn resolve_size(&self, size: &SizeExpr) -> Result<u64, LowerError> {
        match size {
            SizeExpr::Const(c) => Ok(*c),
            SizeExpr::Dim(d) => self.dims.get(d).copied().ok_or_else(|| {
                lower_error(LowerErrorKind::UnknownDimension, format!("Unknown dimension {}", d))
            }),
        }
    }

    /// Shape of a contraction's output, registering it on first definition.
    fn output_shape(&mut self, c: &Contraction) -> Result<TensorShape, LowerError> {
        let name = &c.output.tensor;
        let declared = if c.sizes.is_empty() {
            None
        } else {
            Some(c.sizes.iter().map(|s| self.resolve_size(s)).collect::<Result<Vec<_>, _>>()?)
        };

        if let Some(shape) = self.shape(name) {
            return Ok(shape.clone());
        }

        let shape = match (self.info.output_shapes.get(name), declared) {
            (Some(given), Some(sizes)) if given.sizes() != sizes => {
                return Err(lower_error(
                    LowerErrorKind::DimensionMismatch,
                    format!("Output {} is declared {:?} but given {}", name, sizes, given),
                ));
            }
            (Some(given), _) => given.clone(),
            (None, Some(sizes)) => {
                let dtype = c.inputs
                    .first()
                    .and_then(|i| self.shape(&i.tensor))
                    .map(|s| s.dtype)
                    .unwrap_or(DataType::Float32);
                TensorShape::try_simple(dtype, &sizes).map_err(|e| {
                    lower_error(LowerErrorKind::ShapeOverflow, format!("Output {}: {}", name, e))
                })?
            }
            (None, None) => {
                return Err(lower_error(
                    LowerErrorKind::MissingShape,
                    format!("Output {} has neither declared sizes nor a shape", name),
                ));
            }
        };
        self.tensors.push((name.clone(), shape.clone()));
        Ok(shape)
    }

    fn lower_contraction(&mut self, kernel_name: &str, c: &Contraction) -> Result<Block, LowerError> {
        let mut accesses: Vec<(&TensorAccess, TensorShape)> = Vec::new();
        for input in &c.inputs {
            let shape = self.shape(&input.tensor).cloned().ok_or_else(|| {
                lower_error(LowerErrorKind::UndefinedTensor, format!("Tensor {} is used before it is defined", input.tensor))
            })?;
            accesses.push((input, shape));
        }
        let out_shape = self.output_shape(c)?;

        let mut all: Vec<(&TensorAccess, &TensorShape)> = accesses.iter().map(|(a, s)| (*a, s)).collect();
        all.push((&c.output, &out_shape));
        for (access, shape) in &all {
            if access.indices.len() != shape.rank() {
                return Err(lower_error(
                    LowerErrorKind::RankMismatch,
                    format!("{} uses {} indices on a rank {} tensor", access, access.indices.len(), shape.rank()),
                ));
            }
        }

        let mut block = Block::new(kernel_name);
        let mut ranges = HashMap::new();
        for idx in c.index_names() {
            let range = all
                .iter()
                .flat_map(|(a, s)| a.indices.iter().zip(s.sizes()))
                .filter(|(expr, _)| expr.as_var() == Some(idx.as_str()))
                .map(|(_, size)| size)
                .min()
                .ok_or_else(|| {
                    lower_error(
                        LowerErrorKind::UnboundIndex,
                        format!("Index {} never addresses a dimension on its own", idx),
                    )
                })?;
            ranges.insert(idx.clone(), range);
            block.idxs.push(Index::new(&idx, range));
        }

        for (access, shape) in &all {
            for (expr, size) in access.indices.iter().zip(shape.sizes()) {
                let (lo, hi) = expr.bounds(&ranges).unwrap_or((0, 0));
                if lo < 0 && !block.constraints.contains(expr) {
                    block.constraints.push(expr.clone());
                }
                let upper = Affine::constant(size as i64 - 1) - expr.clone();
                if hi > size as i64 - 1 && !block.constraints.contains(&upper) {
                    block.constraints.push(upper);
                }
            }
        }

        let mut scalars = Vec::new();
        for (access, shape) in &accesses {
            let view = unique_view(&block, &access.tensor);
            let scalar = format!("${}", view);
            block.refs.push(Refinement::new(
                RefDir::In,
                &access.tensor,
                &view,
                access.indices.clone(),
                shape.with_uniform_size(1),
            ));
            block.stmts.push(Statement::Load { from: view, into: scalar.clone() });
            scalars.push(scalar);
        }

        let out_view = unique_view(&block, &c.output.tensor);
        block.refs.push(
            Refinement::new(
                RefDir::Out,
                &c.output.tensor,
                &out_view,
                c.output.indices.clone(),
                out_shape.with_uniform_size(1),
            )
            .with_agg(c.agg),
        );

        let result = match c.combo {
            Some(op) => {
                let result = format!("${}", out_view);
                block.stmts.push(Statement::Intrinsic {
                    name: op.intrinsic().to_string(),
                    inputs: scalars,
                    outputs: vec![result.clone()],
                });
                result
            }
            None => scalars.into_iter().next().unwrap_or_default(),
        };
        block.stmts.push(Statement::Store { from: result, into: out_view });

        debug!(
            "Lowered {} into {} with {} indices and {} constraints",
            c.output.tensor, kernel_name, block.idxs.len(), block.constraints.len()
        );
        Ok(block)
    }
}

/// View name for `tensor` that is not yet used inside `block`.
fn unique_view(block: &Block, tensor: &str) -> String {
    if block.ref_by_into(tensor).is_none() {
        return tensor.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", tensor, n))
        .find(|name| block.ref_by_into(name).is_none())
        .unwrap_or_else(|| tensor.to_string())
}

fn lower_error(kind: LowerErrorKind, message: String) -> LowerError {
    LowerError { message, kind }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::AggOp;
    use crate::utils::errors::TileOptError;

    const MATMUL: &str = "function (A[M, K], B[K, N]) -> (C) { C[m, n : M, N] = +(A[m, k] * B[k, n]); }";

    fn fp32(sizes: &[u64]) -> TensorShape {
        TensorShape::simple(DataType::Float32, sizes)
    }

    fn matmul_info() -> RunInfo {
        RunInfo::new(MATMUL)
            .with_input("A", fp32(&[5, 5]))
            .with_input("B", fp32(&[5, 5]))
    }

    fn lower_err(info: &RunInfo) -> LowerErrorKind {
        match generate_program("test", info) {
            Err(TileOptError::Lower(e)) => e.kind,
            other => panic!("expected lowering error, got {:?}", other),
        }
    }

    #[test]
    fn test_matmul_kernel() {
        let program = generate_program("matmul", &matmul_info()).unwrap();
        let kernel = program.kernel(0).unwrap();
        assert_eq!(kernel.name, "kernel_0");
        assert_eq!(kernel.idx_names(), vec!["k", "m", "n"]);
        assert!(kernel.idxs.iter().all(|i| i.range == 5 && i.is_fresh()));
        assert!(kernel.constraints.is_empty());

        let a = kernel.ref_by_into("A").unwrap();
        assert_eq!(a.dir, RefDir::In);
        assert_eq!(a.access, vec![Affine::var("m"), Affine::var("k")]);
        assert_eq!(a.shape.sizes(), vec![1, 1]);
        assert_eq!(a.shape.strides(), vec![5, 1]);

        let c = kernel.ref_by_into("C").unwrap();
        assert_eq!(c.dir, RefDir::Out);
        assert_eq!(c.agg_op, Some(AggOp::Add));

        let stmts: Vec<String> = kernel.stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(stmts, vec!["$A = load(A)", "$B = load(B)", "$C = mul($A, $B)", "C = store($C)"]);
    }

    #[test]
    fn test_main_and_root() {
        let program = generate_program("matmul", &matmul_info()).unwrap();
        assert_eq!(program.root.name, "matmul");
        let declared: Vec<&str> = program.root.refs.iter().map(|r| r.into.as_str()).collect();
        assert_eq!(declared, vec!["A", "B", "C"]);
        assert!(program.root.refs.iter().all(|r| r.is_declaration()));

        let main = program.main().unwrap();
        assert_eq!(main.ref_by_into("C").map(|r| r.dir), Some(RefDir::Out));
        assert_eq!(main.ref_by_into("C").map(|r| r.shape.sizes()), Some(vec![5, 5]));
        assert_eq!(program.kernels().len(), 1);
    }

    #[test]
    fn test_temporaries_live_in_main() {
        let code = "function (A[N], B[N]) -> (D) {
            T[i : N] = =(A[i] + B[i]);
            D[i : N] = +(T[i] * T[i]);
        }";
        let info = RunInfo::new(code)
            .with_input("A", fp32(&[8]))
            .with_input("B", fp32(&[8]));
        let program = generate_program("two", &info).unwrap();
        assert_eq!(program.kernels().len(), 2);

        let main = program.main().unwrap();
        assert!(main.ref_by_into("T").unwrap().is_declaration());
        assert!(program.root.ref_by_into("T").is_none());

        // Repeated use of one tensor gets distinct views.
        let kernel = program.kernel(1).unwrap();
        assert!(kernel.ref_by_into("T").is_some());
        assert_eq!(kernel.ref_by_into("T_1").map(|r| r.from.as_str()), Some("T"));
    }

    #[test]
    fn test_bound_constraints() {
        let code = "function (I[N], K[W]) -> (O) { O[i : 3] = +(I[i + j - 1] * K[j]); }";
        let info = RunInfo::new(code)
            .with_input("I", fp32(&[3]))
            .with_input("K", fp32(&[3]));
        let program = generate_program("conv", &info).unwrap();
        let kernel = program.kernel(0).unwrap();
        assert_eq!(kernel.idx("i").map(|i| i.range), Some(3));
        assert_eq!(kernel.idx("j").map(|i| i.range), Some(3));

        let lower = Affine::var("i") + Affine::var("j") - Affine::constant(1);
        let upper = Affine::constant(3) - Affine::var("i") - Affine::var("j");
        assert_eq!(kernel.constraints, vec![lower, upper]);
    }

    #[test]
    fn test_output_shape_from_run_info() {
        let code = "function (A[N]) -> (B) { B[i] = =(A[i]); }";
        let info = RunInfo::new(code)
            .with_input("A", TensorShape::simple(DataType::Int8, &[6]))
            .with_output("B", TensorShape::simple(DataType::Int8, &[6]));
        let program = generate_program("copy", &info).unwrap();
        let kernel = program.kernel(0).unwrap();
        assert_eq!(kernel.stmts.last().map(|s| s.to_string()), Some("B = store($A)".to_string()));
        assert_eq!(kernel.ref_by_into("B").map(|r| r.shape.dtype), Some(DataType::Int8));
    }

    #[test]
    fn test_lowering_errors() {
        assert_eq!(lower_err(&RunInfo::new(MATMUL).with_input("A", fp32(&[5, 5]))), LowerErrorKind::MissingShape);
        assert_eq!(
            lower_err(&RunInfo::new(MATMUL).with_input("A", fp32(&[5, 5])).with_input("B", fp32(&[5]))),
            LowerErrorKind::RankMismatch
        );
        assert_eq!(
            lower_err(&RunInfo::new(MATMUL).with_input("A", fp32(&[5, 4])).with_input("B", fp32(&[5, 5]))),
            LowerErrorKind::DimensionMismatch
        );

        let unbound = RunInfo::new("function (A[N]) -> (B) { B[i : N] = =(A[i + j]); }").with_input("A", fp32(&[4]));
        assert_eq!(lower_err(&unbound), LowerErrorKind::UnboundIndex);

        let undefined = RunInfo::new("function (A[N]) -> (B) { B[i : N] = =(Z[i]); }").with_input("A", fp32(&[4]));
        assert_eq!(lower_err(&undefined), LowerErrorKind::UndefinedTensor);

        let unknown = RunInfo::new("function (A[N]) -> (B) { B[i : Q] = =(A[i]); }").with_input("A", fp32(&[4]));
        assert_eq!(lower_err(&unknown), LowerErrorKind::UnknownDimension);

        let missing_out = RunInfo::new("function (A[N]) -> (B, C) { B[i : N] = =(A[i]); }").with_input("A", fp32(&[4]));
        assert_eq!(lower_err(&missing_out), LowerErrorKind::UndefinedTensor);

        let huge = RunInfo::new("function (A[N, M]) -> (B) { B[i, j, k : N, M, M] = +(A[i, j] * A[i, k]); }")
            .with_input("A", fp32(&[2, 1u64 << 32]));
        assert_eq!(lower_err(&huge), LowerErrorKind::ShapeOverflow);
    }

    #[test]
    fn test_parse_errors_surface() {
        let info = RunInfo::new("function (A[N]) -> (B) { B[i] = +(A[i * i]); }").with_input("A", fp32(&[4]));
        assert!(matches!(generate_program("bad", &info), Err(TileOptError::Parse(_))));
    }
}
