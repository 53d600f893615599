//! Partitioning benchmark using criterion.
//!
//! Compares sequential and pool-evaluated cost functions, then a loop
//! over the resulting buckets.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nodepool::{Partitioning, TaskManager};
use rand::Rng;

fn bench_partitioning(c: &mut Criterion) {
    let num_threads = num_cpus::get();
    let pool = TaskManager::new(num_threads).expect("Start failed");
    let mut rng = rand::thread_rng();
    let costs: Vec<u64> = (0..1_000_000).map(|_| rng.gen_range(1..1000)).collect();
    let cost = |i: usize| costs[i];

    let mut group = c.benchmark_group("partitioning");
    group.sample_size(20);

    group.bench_function(BenchmarkId::new("calc", costs.len()), |b| {
        b.iter(|| Partitioning::calc(costs.len(), cost, num_threads).expect("Partitioning failed"))
    });
    group.bench_function(BenchmarkId::new("calc_parallel", costs.len()), |b| {
        b.iter(|| {
            Partitioning::calc_parallel(&pool, costs.len(), cost, num_threads)
                .expect("Partitioning failed")
        })
    });

    let part = Partitioning::calc(costs.len(), cost, num_threads).expect("Partitioning failed");
    group.bench_function("partitioned_loop", |b| {
        b.iter(|| {
            pool.parallel_for_partitioned(&part, num_threads * 2, |i| {
                std::hint::black_box((0..costs[i] / 100).sum::<u64>());
            })
            .expect("Loop failed")
        })
    });

    group.finish();
    let _ = pool.stop();
}

criterion_group!(benches, bench_partitioning);
criterion_main!(benches);
