//! Benchmarks for each optimizer pass and the full pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use forge_ir::{Graph, OpCode};
use forge_optimizer::{Optimizer, OptimizerConfig};

fn quadratic_graph() -> Graph {
    let mut g = Graph::new();
    let x = g.create_input();
    g.mark_diff_input(x);
    let x2 = g.create_binary(OpCode::Mul, x, x).unwrap();
    let one = g.create_constant(1.0);
    let y = g.create_binary(OpCode::Add, x2, one).unwrap();
    g.mark_output(y);
    g
}

fn stability_graph() -> Graph {
    let mut g = Graph::new();
    let x = g.create_input();
    let ex = g.create_unary(OpCode::Exp, x).unwrap();
    let one = g.create_constant(1.0);
    let y = g.create_binary(OpCode::Div, one, ex).unwrap();
    g.mark_output(y);
    g
}

fn cse_graph(width: usize) -> Graph {
    let mut g = Graph::new();
    let x = g.create_input();
    let one = g.create_constant(1.0);
    let mut last = x;
    for _ in 0..width {
        let a = g.create_binary(OpCode::Add, x, one).unwrap();
        let b = g.create_binary(OpCode::Add, x, one).unwrap();
        last = g.create_binary(OpCode::Mul, a, b).unwrap();
    }
    g.mark_output(last);
    g
}

fn bench_stability(c: &mut Criterion) {
    let mut group = c.benchmark_group("stability");
    let graph = stability_graph();
    let optimizer = Optimizer::new(OptimizerConfig {
        stability: true,
        ..OptimizerConfig::default()
    });

    group.bench_function("div_of_exp", |b| {
        b.iter(|| optimizer.optimize(black_box(&graph)).unwrap());
    });
    group.finish();
}

fn bench_cse(c: &mut Criterion) {
    let mut group = c.benchmark_group("cse");
    let optimizer = Optimizer::new(OptimizerConfig {
        cse: true,
        ..OptimizerConfig::default()
    });

    for width in [1usize, 8, 32] {
        let graph = cse_graph(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &graph, |b, graph| {
            b.iter(|| optimizer.optimize(black_box(graph)).unwrap());
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let graph = quadratic_graph();
    let optimizer = Optimizer::new(OptimizerConfig::all_enabled());

    c.bench_function("full_pipeline_quadratic", |b| {
        b.iter(|| optimizer.optimize_with_mapping(black_box(&graph)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_stability,
    bench_cse,
    bench_full_pipeline,
);
criterion_main!(benches);
