use nodepool::{PoolConfig, SharedLoop, TaskManager, parallel};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("nodepool - NUMA-Aware Fork-Join Task Manager\n");

    let config = PoolConfig {
        num_threads: 4,
        trace: true,
        max_trace_events_per_thread: 1000 * 1000,
        ..Default::default()
    };
    let pool = match TaskManager::start(config) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to start task manager: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "Started task manager with {} threads on {} nodes\n",
        pool.num_threads(),
        pool.num_nodes()
    );

    // Example 1: parallel loops of growing size on the entered pool
    println!("Example 1: ParallelFor");
    pool.run_with(|| {
        let mut n = 10;
        while n <= 10_000 {
            let res: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
            let start = Instant::now();
            for _ in 0..5 {
                parallel::parallel_for(0..n, |i| {
                    let val = 1.0 + 1e-5 * i as f64;
                    let mut prod = 1.0f64;
                    for _ in 0..100 {
                        prod *= val;
                    }
                    res[i].store(prod.to_bits(), Ordering::Relaxed);
                });
            }
            println!("  n = {n:>6}: 5 loops in {:?}", start.elapsed());
            n *= 10;
        }
    });

    // Example 2: dynamic scheduling with a shared loop
    println!("\nExample 2: SharedLoop");
    let work = SharedLoop::new(0..1000);
    let per_thread: Vec<AtomicUsize> = (0..pool.num_threads()).map(|_| AtomicUsize::new(0)).collect();
    let result = pool.create_job(pool.num_threads(), |ti| {
        for _ in &work {
            per_thread[ti.thread_nr].fetch_add(1, Ordering::Relaxed);
        }
    });
    if let Err(e) = result {
        eprintln!("Job failed: {e}");
    }
    for (thread, count) in per_thread.iter().enumerate() {
        println!("  thread {thread}: {} iterations", count.load(Ordering::Relaxed));
    }

    let trace = pool.take_trace();
    println!(
        "\nRecorded {} task spans and {} job spans",
        trace.tasks.len(),
        trace.jobs.len()
    );

    println!("Shutting down task manager...");
    match pool.stop() {
        Ok(()) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {e}"),
    }
}
