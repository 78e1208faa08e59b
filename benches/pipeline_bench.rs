//! End-to-end benchmarks: build graph, optimize, compile, execute, through
//! the `ForgeEngine` facade.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forge::{CompilerConfig, ForgeEngine};
use forge_ir::{Graph, NodeId, OpCode};

fn polynomial_graph(terms: usize) -> (Graph, NodeId) {
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
    (g, x)
}

fn bench_full_compile(c: &mut Criterion) {
    let (graph, _) = polynomial_graph(64);

    c.bench_function("compile_default_config", |b| {
        let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
        b.iter(|| engine.compile(black_box(&graph)).unwrap());
    });

    c.bench_function("compile_all_optimizations", |b| {
        let engine = ForgeEngine::new(CompilerConfig::all_optimizations()).unwrap();
        b.iter(|| engine.compile(black_box(&graph)).unwrap());
    });
}

fn bench_compile_and_run(c: &mut Criterion) {
    let (graph, x) = polynomial_graph(64);
    let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
    let program = engine.compile(&graph).unwrap();
    let mapped_x = program.mapping.get(x).unwrap_or(x);

    c.bench_function("run_compiled_polynomial", |b| {
        let (mut values, mut gradients) = program.allocate_buffers().unwrap();
        b.iter(|| unsafe {
            values.set_value(mapped_x.0, program.vector_width(), black_box(2.0));
            program.call(&mut values, gradients.as_mut());
        });
    });
}

criterion_group!(benches, bench_full_compile, bench_compile_and_run);
criterion_main!(benches);
