//! Benchmarks for lowering, tiling and access analysis.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tileopt::analysis::compute_access;
use tileopt::ir::{generate_program, DataType, Program, RunInfo, TensorShape};
use tileopt::transform::apply_tile;

const MATMUL: &str = r#"
    function (A[M, K], B[K, N]) -> (C) {
        C[m, n : M, N] = +(A[m, k] * B[k, n]);
    }
"#;

fn matmul_info(size: u64) -> RunInfo {
    let shape = TensorShape::simple(DataType::Float32, &[size, size]);
    RunInfo::new(MATMUL)
        .with_input("A", shape.clone())
        .with_input("B", shape)
}

fn matmul(size: u64) -> Program {
    generate_program("matmul", &matmul_info(size)).unwrap()
}

/// Benchmark parsing plus lowering.
fn bench_lowering(c: &mut Criterion) {
    let info = matmul_info(64);
    c.bench_function("lower_matmul", |b| {
        b.iter(|| generate_program("matmul", black_box(&info)).unwrap())
    });
}

/// Benchmark tiling a kernel.
fn bench_tiling(c: &mut Criterion) {
    let program = matmul(100);
    let kernel = program.kernel(0).unwrap();
    c.bench_function("tile_matmul_partial", |b| {
        b.iter(|| apply_tile(black_box(kernel), &[32, 32, 32]).unwrap())
    });
}

/// Benchmark access analysis before and after tiling.
fn bench_access(c: &mut Criterion) {
    let program = matmul(100);
    let kernel = program.kernel(0).unwrap();
    let tiled = apply_tile(kernel, &[32, 32, 32]).unwrap();

    c.bench_function("access_untiled", |b| {
        b.iter(|| compute_access(black_box(kernel), "A").unwrap())
    });
    c.bench_function("access_tiled", |b| {
        b.iter(|| compute_access(black_box(&tiled), "A").unwrap())
    });
}

criterion_group!(benches, bench_lowering, bench_tiling, bench_access);
criterion_main!(benches);
