use nodepool::{Partitioning, SharedLoop, TaskManager, parallel, split};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counters(n: usize) -> Vec<AtomicUsize> {
    (0..n).map(|_| AtomicUsize::new(0)).collect()
}

fn all_once(hits: &[AtomicUsize]) -> bool {
    hits.iter().all(|h| h.load(Ordering::SeqCst) == 1)
}

#[test]
fn test_split_matches_task_info_split() {
    let pool = TaskManager::new(3).expect("Start failed");
    pool.create_job(5, |ti| {
        assert_eq!(ti.split(0..23), split(0..23, ti.task_nr, 5));
    })
    .expect("Job failed");
    pool.stop().expect("Shutdown failed");
}

#[test]
fn test_free_parallel_for_without_pool() {
    let hits = counters(50);
    parallel::parallel_for(0..50, |i| {
        hits[i].fetch_add(1, Ordering::SeqCst);
    });
    assert!(all_once(&hits));
}

#[test]
fn test_free_parallel_for_inside_task() {
    let pool = TaskManager::new(4).expect("Start failed");
    let hits = counters(400);

    pool.create_job(1, |_| {
        parallel::parallel_for(0..400, |i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
    })
    .expect("Job failed");

    assert!(all_once(&hits));
    pool.stop().expect("Shutdown failed");
}

#[test]
fn test_free_parallel_for_range_on_entered_pool() {
    let pool = TaskManager::new(4).expect("Start failed");
    let hits = counters(97);

    {
        let _guard = pool.enter();
        parallel::parallel_for_range(0..97, |r| {
            for i in r {
                hits[i].fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    assert!(all_once(&hits));
    pool.stop().expect("Shutdown failed");
}

#[test]
fn test_random_cost_partitioning() {
    let mut rng = rand::thread_rng();
    let costs: Vec<u64> = (0..500).map(|_| rng.gen_range(0..100)).collect();
    let part = Partitioning::calc(costs.len(), |i| costs[i], 8).expect("Partitioning failed");

    assert_eq!(part.range(), 0..500);
    assert_eq!(part.iter().map(|r| r.len()).sum::<usize>(), 500);

    let pool = TaskManager::new(4).expect("Start failed");
    let hits = counters(500);
    pool.parallel_for_partitioned(&part, 16, |i| {
        hits[i].fetch_add(1, Ordering::SeqCst);
    })
    .expect("Loop failed");
    assert!(all_once(&hits));
    pool.stop().expect("Shutdown failed");
}

#[test]
fn test_shared_loop_balances_uneven_work() {
    let pool = TaskManager::new(4).expect("Start failed");
    let hits = counters(300);
    let work = SharedLoop::new(0..300);

    pool.create_job(pool.num_threads(), |_| {
        for i in &work {
            // Later indices are more expensive.
            std::hint::black_box((0..i * 10).sum::<usize>());
            hits[i].fetch_add(1, Ordering::SeqCst);
        }
    })
    .expect("Job failed");

    assert!(all_once(&hits));
    pool.stop().expect("Shutdown failed");
}
