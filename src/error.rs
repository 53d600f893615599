//! Error types reported by the task manager and its work-distribution helpers.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported synchronously to the caller of the offending operation.
///
/// Panics raised inside task bodies are not represented here: they are
/// re-raised on the thread that submitted the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("a pool needs at least one thread")]
    NoThreads,

    #[error("a pool needs at least one node")]
    NoNodes,

    #[error("requested {requested} nodes, at most {max} are supported")]
    TooManyNodes { requested: usize, max: usize },

    #[error("a job must request at least one task")]
    NoTasks,

    #[error("a partitioning needs at least one bucket")]
    EmptyPartitioning,

    #[error("task count {ntasks} is not a multiple of the partition size {parts}")]
    PartitionMismatch { ntasks: usize, parts: usize },

    #[error("failed to spawn worker thread {thread_nr}: {reason}")]
    Spawn { thread_nr: usize, reason: String },

    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),
}
