//! Parallel loops on the calling thread's current pool.
//!
//! Inside a task, or after [`TaskManager::enter`], these run on that pool
//! with one task per pool thread. Anywhere else they are plain sequential
//! loops, so library code can use them without knowing whether a pool
//! exists.
//!
//! [`TaskManager::enter`]: crate::TaskManager::enter

use crate::context;
use crate::error::Result;
use crate::job::TaskInfo;
use crate::partitioning::Partitioning;
use crate::range::split;
use std::ops::Range;

/// Calls `body(i)` for every `i` in `range`.
pub fn parallel_for<F>(range: Range<usize>, body: F)
where
    F: Fn(usize) + Sync,
{
    match context::current_pool() {
        Some(pool) => pool.run_tasks(pool.num_threads(), &|ti: &TaskInfo| {
            for i in ti.split(range.clone()) {
                body(i);
            }
        }),
        None => range.for_each(body),
    }
}

/// Calls `body` with disjoint subranges that together cover `range`.
pub fn parallel_for_range<F>(range: Range<usize>, body: F)
where
    F: Fn(Range<usize>) + Sync,
{
    match context::current_pool() {
        Some(pool) => pool.run_tasks(pool.num_threads(), &|ti: &TaskInfo| body(ti.split(range.clone()))),
        None => body(range),
    }
}

/// Calls `body(i)` for every index covered by `part`, `ntasks` tasks in total.
///
/// `ntasks` must be a positive multiple of `part.size()`, also when no pool
/// is current.
pub fn parallel_for_partitioned<F>(part: &Partitioning, ntasks: usize, body: F) -> Result<()>
where
    F: Fn(usize) + Sync,
{
    match context::current_pool() {
        Some(pool) => pool.for_each_partitioned(part, ntasks, &body),
        None => {
            let tasks_per_part = part.tasks_per_bucket(ntasks)?;
            for task_nr in 0..ntasks {
                let bucket = part.bucket(task_nr / tasks_per_part);
                split(bucket, task_nr % tasks_per_part, tasks_per_part).for_each(&body);
            }
            Ok(())
        }
    }
}
