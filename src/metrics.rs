//! Optional dispatch counters, compiled in with the `metrics` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the scheduler while it runs jobs.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs whose submitter returned.
    pub jobs_completed: AtomicU64,
    /// Task bodies invoked, including panicking ones.
    pub tasks_executed: AtomicU64,
    /// Jobs submitted from inside a task body.
    pub nested_jobs: AtomicU64,
    /// Jobs run on the submitting thread alone because no frame was free.
    pub sequential_fallbacks: AtomicU64,
    /// Panics discarded because an earlier task of the same job panicked first.
    pub panics_suppressed: AtomicU64,
    pub start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            nested_jobs: AtomicU64::new(0),
            sequential_fallbacks: AtomicU64::new(0),
            panics_suppressed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            nested_jobs: self.nested_jobs.load(Ordering::Relaxed),
            sequential_fallbacks: self.sequential_fallbacks.load(Ordering::Relaxed),
            panics_suppressed: self.panics_suppressed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub tasks_executed: u64,
    pub nested_jobs: u64,
    pub sequential_fallbacks: u64,
    pub panics_suppressed: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Jobs per second since the pool started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Average number of tasks per completed job.
    pub fn tasks_per_job(&self) -> f64 {
        if self.jobs_completed > 0 {
            self.tasks_executed as f64 / self.jobs_completed as f64
        } else {
            0.0
        }
    }
}
