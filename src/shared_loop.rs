//! Dynamically shared loop cursor.
//!
//! A [`SharedLoop`] is created inside a job body (or captured by it) and
//! iterated by every task of the job. Tasks that finish their iterations
//! early keep pulling indices, which balances irregular per-index cost
//! better than a static [`split`](crate::range::split).

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An index range consumed cooperatively by all tasks of a job.
///
/// Every index in the range is handed out to exactly one iterator. The
/// order in which indices are produced across tasks is unspecified.
///
/// # Example
///
/// ```
/// use nodepool::SharedLoop;
/// use nodepool::TaskManager;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let pool = TaskManager::new(4).unwrap();
/// let sl = SharedLoop::new(0..1000);
/// let sum = AtomicUsize::new(0);
/// pool.create_job(8, |_ti| {
///     for i in &sl {
///         sum.fetch_add(i, Ordering::Relaxed);
///     }
/// })
/// .unwrap();
/// assert_eq!(sum.into_inner(), (0..1000).sum());
/// ```
#[derive(Debug)]
pub struct SharedLoop {
    next: AtomicUsize,
    end: usize,
}

impl SharedLoop {
    /// Creates a shared loop over `range`.
    pub fn new(range: Range<usize>) -> Self {
        SharedLoop {
            next: AtomicUsize::new(range.start),
            end: range.end.max(range.start),
        }
    }

    /// Returns an iterator claiming indices from the shared cursor.
    pub fn iter(&self) -> SharedLoopIter<'_> {
        SharedLoopIter { shared: self }
    }

    /// The exclusive end of the range; iteration stops once the cursor reaches it.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of indices not yet handed out.
    pub fn remaining(&self) -> usize {
        self.end - self.next.load(Ordering::Relaxed).min(self.end)
    }

    fn claim(&self) -> Option<usize> {
        // The cursor saturates at `end`, so it can never wrap.
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next < self.end).then(|| next + 1)
            })
            .ok()
    }
}

impl<'a> IntoIterator for &'a SharedLoop {
    type Item = usize;
    type IntoIter = SharedLoopIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the indices one task claims from a [`SharedLoop`].
#[derive(Debug)]
pub struct SharedLoopIter<'a> {
    shared: &'a SharedLoop,
}

impl Iterator for SharedLoopIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.shared.claim()
    }
}
