//! Startup latency benchmark using criterion.
//!
//! Measures TaskManager start plus stop time with different configurations.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nodepool::{PinningStrategy, PoolConfig, TaskManager};

fn bench_startup(c: &mut Criterion) {
    let num_threads = num_cpus::get();

    let mut group = c.benchmark_group("startup");
    group.sample_size(10);

    let configs = [
        (
            "two_threads",
            PoolConfig {
                num_threads: 2,
                num_nodes: Some(1),
                ..Default::default()
            },
        ),
        (
            "all_cpus",
            PoolConfig {
                num_threads,
                ..Default::default()
            },
        ),
        (
            "all_cpus_pinned",
            PoolConfig {
                num_threads,
                pinning: PinningStrategy::Linear,
                ..Default::default()
            },
        ),
    ];

    for (name, config) in configs {
        group.bench_function(BenchmarkId::new("config", name), |b| {
            b.iter(|| {
                let pool = TaskManager::start(config.clone()).expect("Start failed");

                // Do minimal work to ensure the pool is operational
                pool.create_job(1, |_| std::hint::black_box(()))
                    .expect("Job failed");

                let _ = pool.stop();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_startup);
criterion_main!(benches);
