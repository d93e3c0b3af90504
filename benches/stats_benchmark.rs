//! Benchmarks for the latency statistics hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reverb::stats::{calculate_latency_stats, percentile};

fn synthetic_latencies(n: usize) -> Vec<i64> {
    // Deterministic spread resembling bucketed latencies.
    (0..n).map(|i| ((i * 7919) % 2000) as i64 / 5 * 5).collect()
}

fn bench_latency_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_stats");

    for size in [100usize, 10_000, 1_000_000] {
        let latencies = synthetic_latencies(size);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("size", size), &latencies, |b, data| {
            b.iter(|| calculate_latency_stats(black_box(data)))
        });
    }

    group.finish();
}

fn bench_percentile(c: &mut Criterion) {
    let mut sorted = synthetic_latencies(100_000);
    sorted.sort_unstable();

    c.bench_function("percentile_p99", |b| {
        b.iter(|| percentile(black_box(&sorted), 99))
    });
}

criterion_group!(benches, bench_latency_stats, bench_percentile);
criterion_main!(benches);
