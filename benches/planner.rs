//! Capacity planning and batching benchmarks
//!
//! - Footprint estimation across the estimator chain
//! - Plan computation against a single device
//! - Embedding batch partitioning for growing inputs

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use model_gateway::batch::VolumeBatcher;
use model_gateway::config::BatchConfig;
use model_gateway::gpu::AcceleratorDevice;
use model_gateway::models::CacheScanner;
use model_gateway::quantization::EstimatorChain;
use model_gateway::quantization::planner::plan_for_device;
use std::hint::black_box;
use std::sync::Arc;

const MODEL_NAMES: &[&str] = &[
    "Qwen/Qwen2.5-7B-Instruct",
    "mistralai/Mistral-7B-Instruct-v0.2",
    "org/custom-13b-chat",
    "org/unknown-model",
];

fn bench_estimate(c: &mut Criterion) {
    let cache = tempfile::TempDir::new().unwrap();
    let chain = EstimatorChain::standard(Arc::new(CacheScanner::new(cache.path())));

    let mut group = c.benchmark_group("estimate_footprint");
    for name in MODEL_NAMES {
        group.bench_with_input(BenchmarkId::from_parameter(name), name, |b, name| {
            b.iter(|| chain.estimate_footprint(black_box(name)))
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let device = AcceleratorDevice::new(0, "Bench GPU", 24.0, 4.0, 20.0);

    let mut group = c.benchmark_group("plan_for_device");
    for footprint in [0.5, 14.0, 140.0] {
        group.bench_with_input(BenchmarkId::from_parameter(footprint), &footprint, |b, fp| {
            b.iter(|| plan_for_device(black_box(*fp), &device))
        });
    }
    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    let batcher = VolumeBatcher::new(&BatchConfig::default());

    let mut group = c.benchmark_group("partition");
    for count in [10usize, 1_000, 10_000] {
        let texts: Vec<String> = (0..count).map(|i| "token ".repeat(i % 50 + 1)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &texts, |b, texts| {
            b.iter(|| batcher.partition(black_box(texts), 10_000))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_estimate, bench_plan, bench_partition);
criterion_main!(benches);
