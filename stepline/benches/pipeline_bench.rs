//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stepline::prelude::*;
use std::time::Duration;

fn linear_pipeline(steps: usize) -> Pipeline<u64> {
    let mut builder = PipelineBuilder::new("bench-linear");
    for _ in 0..steps {
        builder = builder.step(Action::unary(|v: u64| v.wrapping_add(1)));
    }
    builder.build().unwrap()
}

fn looping_pipeline() -> Pipeline<u64> {
    PipelineBuilder::new("bench-loop")
        .step_labeled("inc", Action::unary(|v: u64| v + 1))
        .step(Action::jump_when(|v: &u64| *v < 100, "inc", Duration::ZERO))
        .build()
        .unwrap()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let linear = linear_pipeline(16);
    c.bench_function("run_16_unary_steps", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(linear.run(black_box(0)).await.unwrap()) });
    });

    let looping = looping_pipeline();
    c.bench_function("run_100_jumps", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(looping.run(black_box(0)).await.unwrap()) });
    });

    let provider = PipelineProvider::pooled(4, || Ok(linear_pipeline(16))).unwrap();
    c.bench_function("pooled_provider_run", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(provider.run(black_box(0)).await.unwrap()) });
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
