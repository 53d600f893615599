//! # nodepool - NUMA-Aware Fork-Join Task Manager
//!
//! A fixed pool of worker threads executing fork-join jobs. A job is a
//! closure run once for every task number in `0..ntasks`; the submitting
//! thread takes part as thread 0 and returns when every task finished.
//!
//! ## Architecture
//!
//! - **Task manager**: owns the worker threads and publishes jobs to them
//! - **Node barrier**: every job splits its tasks over the nodes of the
//!   pool; workers claim tasks of their own node first, then help others
//! - **Job frames**: a small fixed set of slots, so task bodies can submit
//!   nested jobs
//! - **Loops**: [`SharedLoop`] for dynamic self-scheduling, [`split`] and
//!   [`Partitioning`] for static and cost-balanced splits, and the
//!   `parallel_for` family on top of them
//!
//! ## Example
//!
//! ```
//! use nodepool::TaskManager;
//!
//! let pool = TaskManager::new(4).unwrap();
//! let mut squares = vec![0usize; 1000];
//! {
//!     use nodepool::ParallelSliceMut;
//!     squares.par_for_each_mut(&pool, |i, x| *x = i * i);
//! }
//! assert_eq!(squares[31], 961);
//! pool.stop().unwrap();
//! ```

pub mod context;
pub mod counter;
pub mod error;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parallel;
pub mod partitioning;
pub mod range;
pub mod shared_loop;
pub mod slice;
pub mod task_manager;
pub mod topology;
pub mod trace;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
    /// Pin each worker to a core of the NUMA node it belongs to.
    NodeLocal,
}

pub use context::{EnterGuard, ThreadIdentity};
pub use error::{Error, Result};
pub use job::TaskInfo;
pub use partitioning::Partitioning;
pub use range::split;
pub use shared_loop::SharedLoop;
pub use slice::{ParallelSlice, ParallelSliceMut};
pub use task_manager::{PoolConfig, TaskManager};
pub use trace::{TraceId, TraceLog};
