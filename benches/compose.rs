use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use covex::core::CoverageDataset;
use covex::query::{
    compose, evaluate_expression, parse_expression, ComposePolicies, CompositionOp,
    HitMergePolicy,
};

/// `count` addresses starting at `start`, every `stride` bytes.
fn dataset(start: u64, stride: u64, count: u64) -> CoverageDataset {
    (0..count).map(|i| (start + i * stride, i % 17 + 1)).collect()
}

fn bench_compose_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    for count in [1_000u64, 100_000] {
        // half the keys overlap
        let left = dataset(0x400000, 4, count);
        let right = dataset(0x400000 + 2 * count, 4, count);
        group.throughput(Throughput::Elements(2 * count));
        for op in [
            CompositionOp::Union,
            CompositionOp::Intersection,
            CompositionOp::Subtract,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", op), count),
                &(&left, &right),
                |b, (l, r)| b.iter(|| compose(l, r, op, HitMergePolicy::Sum)),
            );
        }
    }
    group.finish();
}

fn bench_expression(c: &mut Criterion) {
    let sets: HashMap<String, CoverageDataset> = ["A", "B", "C", "D"]
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), dataset(0x400000 + i as u64 * 0x1000, 4, 20_000)))
        .collect();
    let expr = "(A | B) & (C | D) - A";

    let mut group = c.benchmark_group("expression");
    group.bench_function("parse", |b| b.iter(|| parse_expression(expr)));
    let plan = parse_expression(expr).expect("valid expression");
    group.bench_function("evaluate", |b| {
        b.iter(|| evaluate_expression(&plan, &sets, ComposePolicies::default()))
    });
    group.finish();
}

criterion_group!(benches, bench_compose_ops, bench_expression);
criterion_main!(benches);
