//! Per-node dispatch counters.
//!
//! Every job frame owns one [`NodeData`] per node. While a job is open the
//! counters only move forward through fetch-and-increment; the publishing
//! thread resets them while the frame is closed and no worker is registered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Dispatch state of one node for the job currently held by a frame.
#[derive(Debug, Default)]
pub struct NodeData {
    /// Next node-local task index to hand out. Overshoots the budget by at
    /// most one per visiting thread.
    start_cnt: AtomicUsize,
    /// Tasks of this node that finished running.
    complete_cnt: AtomicUsize,
    /// Whether the node has a non-empty share of the current job.
    participate: AtomicBool,
}

impl NodeData {
    /// Creates idle counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares the counters for a new job. Only called on a closed frame.
    pub(crate) fn reset(&self, participate: bool) {
        self.start_cnt.store(0, Ordering::Relaxed);
        self.complete_cnt.store(0, Ordering::Relaxed);
        self.participate.store(participate, Ordering::Relaxed);
    }

    /// Claims the next node-local task index, or `None` once `budget` is exhausted.
    pub(crate) fn claim(&self, budget: usize) -> Option<usize> {
        let local = self.start_cnt.fetch_add(1, Ordering::Relaxed);
        (local < budget).then_some(local)
    }

    /// Records that a claimed task finished running.
    pub(crate) fn finish_task(&self) {
        // Release pairs with the acquire in `is_complete` so the submitter
        // sees every side effect of the task.
        self.complete_cnt.fetch_add(1, Ordering::Release);
    }

    pub fn participates(&self) -> bool {
        self.participate.load(Ordering::Relaxed)
    }

    /// True once every task of the node's `budget` finished.
    pub fn is_complete(&self, budget: usize) -> bool {
        !self.participates() || self.complete_cnt.load(Ordering::Acquire) >= budget
    }

    /// Number of finished tasks in the current job.
    pub fn completed(&self) -> usize {
        self.complete_cnt.load(Ordering::Acquire)
    }
}
