//! Static splitting of index ranges among the tasks of a job.

use std::ops::Range;

/// Returns the part of `range` owned by task `task_nr` out of `ntasks`.
///
/// The pieces for `0..ntasks` are contiguous, pairwise disjoint and cover
/// `range` exactly. Sizes differ by at most one: the first
/// `range.len() % ntasks` pieces get the extra element.
///
/// `ntasks == 0` yields an empty range at `range.start`. Asking for a
/// `task_nr >= ntasks` is a caller bug; debug builds assert, release builds
/// get an empty range at `range.end`.
///
/// # Example
///
/// ```
/// use nodepool::range::split;
///
/// assert_eq!(split(0..10, 0, 3), 0..4);
/// assert_eq!(split(0..10, 1, 3), 4..7);
/// assert_eq!(split(0..10, 2, 3), 7..10);
/// ```
pub fn split(range: Range<usize>, task_nr: usize, ntasks: usize) -> Range<usize> {
    if ntasks == 0 || range.start >= range.end {
        return range.start..range.start;
    }
    debug_assert!(
        task_nr < ntasks,
        "task {task_nr} out of bounds for a job of {ntasks} tasks"
    );

    let len = range.end - range.start;
    let base = len / ntasks;
    let extra = len % ntasks;

    let offset = task_nr.saturating_mul(base).saturating_add(task_nr.min(extra));
    let size = base + usize::from(task_nr < extra);

    let first = range.start.saturating_add(offset).min(range.end);
    let next = first.saturating_add(size).min(range.end);
    first..next
}
