//! Benchmarks for kernel compilation and execution, scalar vs. 4-wide.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use forge_backend::{Avx2Backend, Buffer, ExecutableKernel, InstructionSet, Sse2Backend};
use forge_ir::{Graph, OpCode};

fn polynomial_graph(terms: usize) -> Graph {
    let mut g = Graph::new();
    let x = g.create_input();
    g.mark_diff_input(x);
    let mut acc = g.create_constant(1.0);
    for i in 0..terms {
        let coeff = g.create_constant(i as f64 + 1.0);
        let term = g.create_binary(OpCode::Mul, x, coeff).unwrap();
        acc = g.create_binary(OpCode::Add, acc, term).unwrap();
    }
    g.mark_output(acc);
    g
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_compile");
    let sse2 = Sse2Backend::default();

    for terms in [4usize, 32, 128] {
        let graph = polynomial_graph(terms);
        group.bench_with_input(BenchmarkId::from_parameter(terms), &graph, |b, graph| {
            b.iter(|| {
                ExecutableKernel::compile_default(black_box(graph), &sse2 as &dyn InstructionSet)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_call");
    let graph = polynomial_graph(32);

    let sse2 = Sse2Backend::default();
    let scalar_kernel = ExecutableKernel::compile_default(&graph, &sse2).unwrap();
    let mut scalar_values =
        Buffer::new(scalar_kernel.node_count, scalar_kernel.vector_width).unwrap();
    let mut scalar_gradients =
        Buffer::new(scalar_kernel.node_count, scalar_kernel.vector_width).unwrap();
    group.bench_function("sse2", |b| {
        b.iter(|| unsafe {
            scalar_kernel.call(
                black_box(scalar_values.as_mut_ptr()),
                scalar_gradients.as_mut_ptr(),
                scalar_kernel.node_count,
            )
        });
    });

    let avx2 = Avx2Backend::default();
    let vector_kernel = ExecutableKernel::compile_default(&graph, &avx2).unwrap();
    let mut vector_values =
        Buffer::new(vector_kernel.node_count, vector_kernel.vector_width).unwrap();
    let mut vector_gradients =
        Buffer::new(vector_kernel.node_count, vector_kernel.vector_width).unwrap();
    group.bench_function("avx2", |b| {
        b.iter(|| unsafe {
            vector_kernel.call(
                black_box(vector_values.as_mut_ptr()),
                vector_gradients.as_mut_ptr(),
                vector_kernel.node_count,
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_call);
criterion_main!(benches);
