//! Job round-trip benchmark using criterion.
//!
//! Measures the cost of publishing a job and waiting for its tasks, for
//! empty bodies and for a parallel loop with real work.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nodepool::{SharedLoop, TaskManager};

fn bench_empty_jobs(c: &mut Criterion) {
    let num_threads = num_cpus::get();
    let pool = TaskManager::new(num_threads).expect("Start failed");

    // Warmup
    for _ in 0..100 {
        pool.create_job(num_threads, |_| {}).expect("Job failed");
    }

    let mut group = c.benchmark_group("create_job");
    for ntasks in [1, num_threads, num_threads * 8] {
        group.bench_function(BenchmarkId::new("empty", ntasks), |b| {
            b.iter(|| {
                pool.create_job(ntasks, |ti| {
                    std::hint::black_box(ti.task_nr);
                })
                .expect("Job failed")
            })
        });
    }
    group.finish();

    let _ = pool.stop();
}

fn bench_loops(c: &mut Criterion) {
    const N: usize = 100_000;
    let num_threads = num_cpus::get();
    let pool = TaskManager::new(num_threads).expect("Start failed");
    let work = |i: usize| {
        let val = 1.0 + 1e-5 * i as f64;
        (0..100).fold(1.0f64, |prod, _| prod * val)
    };

    let mut group = c.benchmark_group("loops");
    group.throughput(Throughput::Elements(N as u64));

    group.bench_function("static_split", |b| {
        b.iter(|| {
            pool.parallel_for(0..N, num_threads, |i| {
                std::hint::black_box(work(i));
            })
            .expect("Loop failed")
        })
    });

    group.bench_function("shared_loop", |b| {
        b.iter(|| {
            let shared = SharedLoop::new(0..N);
            pool.create_job(num_threads, |_| {
                for i in &shared {
                    std::hint::black_box(work(i));
                }
            })
            .expect("Job failed")
        })
    });

    group.finish();
    let _ = pool.stop();
}

criterion_group!(benches, bench_empty_jobs, bench_loops);
criterion_main!(benches);
