//! Job definitions: the per-task [`TaskInfo`] and the reusable frames that
//! hold an in-flight job while workers claim its tasks.

use crate::counter::NodeData;
use crate::range::split;
use crossbeam::utils::CachePadded;
use std::any::Any;
use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Panic payload captured from a task body.
pub(crate) type Payload = Box<dyn Any + Send + 'static>;

/// Identity of the task being executed, passed to every invocation of a job body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskInfo {
    /// Index of this task within the job, in `0..ntasks`.
    pub task_nr: usize,
    /// Number of tasks requested for the job.
    pub ntasks: usize,
    /// Pool thread running the task, in `0..nthreads`. The submitting thread is 0.
    pub thread_nr: usize,
    pub nthreads: usize,
    /// Node of the running thread, in `0..nnodes`.
    pub node_nr: usize,
    pub nnodes: usize,
}

impl TaskInfo {
    /// The part of `range` this task owns under a static split.
    pub fn split(&self, range: Range<usize>) -> Range<usize> {
        split(range, self.task_nr, self.ntasks)
    }
}

/// Type-erased reference to a job body living on the submitter's stack.
#[derive(Clone, Copy)]
pub(crate) struct ErasedBody {
    ctx: *const (),
    call: unsafe fn(*const (), &TaskInfo),
}

unsafe fn call_body<F: Fn(&TaskInfo) + Sync>(ctx: *const (), info: &TaskInfo) {
    // SAFETY: `ctx` was produced from a `&F` in `ErasedBody::new`.
    let body = unsafe { &*(ctx as *const F) };
    body(info);
}

impl ErasedBody {
    pub(crate) fn new<F: Fn(&TaskInfo) + Sync>(body: &F) -> Self {
        ErasedBody {
            ctx: body as *const F as *const (),
            call: call_body::<F>,
        }
    }

    /// # Safety
    /// The body this was created from must still be alive.
    pub(crate) unsafe fn invoke(&self, info: &TaskInfo) {
        unsafe { (self.call)(self.ctx, info) }
    }
}

/// Single-assignment slot keeping the first failure of a job.
#[derive(Debug)]
pub(crate) struct FailureSlot<T> {
    failed: AtomicBool,
    first: Mutex<Option<T>>,
    suppressed: AtomicUsize,
}

impl<T> FailureSlot<T> {
    pub(crate) fn new() -> Self {
        FailureSlot {
            failed: AtomicBool::new(false),
            first: Mutex::new(None),
            suppressed: AtomicUsize::new(0),
        }
    }

    /// Stores `failure` if it is the first one; returns false when it was dropped.
    pub(crate) fn record(&self, failure: T) -> bool {
        if self
            .failed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.first.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure);
            true
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Takes the first failure and clears the slot for reuse.
    pub(crate) fn take(&self) -> Option<T> {
        let first = self
            .first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.failed.store(false, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
        first
    }

    pub(crate) fn suppressed(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// Reusable slot holding one in-flight job.
///
/// A frame is owned by exactly one submitter between [`JobFrame::try_acquire`]
/// and [`JobFrame::release`]. Workers register through `active` before
/// reading anything the submitter wrote; the submitter only rewrites the
/// frame while it is closed and `active` is zero.
pub(crate) struct JobFrame {
    busy: AtomicBool,
    /// Id of the open job, 0 when closed.
    open: AtomicU64,
    /// Workers currently registered on this frame.
    active: AtomicUsize,
    ntasks: AtomicUsize,
    body: UnsafeCell<Option<ErasedBody>>,
    nodes: Box<[CachePadded<NodeData>]>,
    pub(crate) failure: FailureSlot<Payload>,
}

// SAFETY: `body` is written only by the owning submitter while the frame is
// closed and unreferenced, and read only by threads registered on an open
// frame (see `enter`/`close`).
unsafe impl Sync for JobFrame {}
unsafe impl Send for JobFrame {}

impl JobFrame {
    pub(crate) fn new(nnodes: usize) -> Self {
        JobFrame {
            busy: AtomicBool::new(false),
            open: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            ntasks: AtomicUsize::new(0),
            body: UnsafeCell::new(None),
            nodes: (0..nnodes).map(|_| CachePadded::new(NodeData::new())).collect(),
            failure: FailureSlot::new(),
        }
    }

    pub(crate) fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Makes a job visible to workers.
    ///
    /// # Safety
    /// The caller must own the frame (acquired, closed, no registered
    /// workers) and keep `body` alive until [`JobFrame::close`] returns.
    pub(crate) unsafe fn publish(&self, job_id: u64, ntasks: usize, body: ErasedBody) {
        debug_assert_eq!(self.open.load(Ordering::Relaxed), 0);
        let nnodes = self.nodes.len();
        unsafe { *self.body.get() = Some(body) };
        self.ntasks.store(ntasks, Ordering::Relaxed);
        for (node_nr, node) in self.nodes.iter().enumerate() {
            node.reset(!split(0..ntasks, node_nr, nnodes).is_empty());
        }
        self.open.store(job_id, Ordering::Release);
    }

    /// Registers the calling worker. Returns the open job id, or `None` if the
    /// frame closed in the meantime. Every successful call must be paired
    /// with [`JobFrame::leave`].
    pub(crate) fn enter(&self) -> Option<u64> {
        if self.open.load(Ordering::Acquire) == 0 {
            return None;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        match self.open.load(Ordering::SeqCst) {
            0 => {
                self.active.fetch_sub(1, Ordering::Release);
                None
            }
            job_id => Some(job_id),
        }
    }

    pub(crate) fn leave(&self) {
        self.active.fetch_sub(1, Ordering::Release);
    }

    /// Closes the job and waits until no worker references the frame.
    pub(crate) fn close(&self) {
        self.open.store(0, Ordering::SeqCst);
        let backoff = crossbeam::utils::Backoff::new();
        while self.active.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
        // SAFETY: closed and unreferenced, only the owner touches `body` now.
        unsafe { *self.body.get() = None };
    }

    pub(crate) fn ntasks(&self) -> usize {
        self.ntasks.load(Ordering::Relaxed)
    }

    /// # Safety
    /// The caller must be the owner of an open frame or registered on it.
    pub(crate) unsafe fn body(&self) -> Option<ErasedBody> {
        unsafe { *self.body.get() }
    }

    pub(crate) fn nodes(&self) -> &[CachePadded<NodeData>] {
        &self.nodes
    }

    /// True once every participating node finished its share.
    pub(crate) fn is_complete(&self) -> bool {
        let ntasks = self.ntasks();
        let nnodes = self.nodes.len();
        self.nodes
            .iter()
            .enumerate()
            .all(|(node_nr, node)| node.is_complete(split(0..ntasks, node_nr, nnodes).len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_task_info_split() {
        let info = TaskInfo {
            task_nr: 1,
            ntasks: 3,
            thread_nr: 0,
            nthreads: 1,
            node_nr: 0,
            nnodes: 1,
        };
        assert_eq!(info.split(0..9), 3..6);
    }

    #[test]
    fn test_erased_body_invocation() {
        let hits = AtomicUsize::new(0);
        let body = |ti: &TaskInfo| {
            hits.fetch_add(ti.task_nr + 1, Ordering::Relaxed);
        };
        let erased = ErasedBody::new(&body);
        let info = TaskInfo {
            task_nr: 4,
            ntasks: 5,
            thread_nr: 0,
            nthreads: 1,
            node_nr: 0,
            nnodes: 1,
        };
        unsafe { erased.invoke(&info) };
        assert_eq!(hits.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_failure_slot_keeps_first() {
        let slot = FailureSlot::new();
        assert!(slot.record("first"));
        assert!(!slot.record("second"));
        assert!(!slot.record("third"));
        assert_eq!(slot.suppressed(), 2);
        assert_eq!(slot.take(), Some("first"));
        assert_eq!(slot.take(), None);
        assert!(slot.record("again"));
    }

    #[test]
    fn test_frame_publish_marks_participating_nodes() {
        let frame = JobFrame::new(4);
        assert!(frame.try_acquire());
        assert!(!frame.try_acquire());

        let body = |_: &TaskInfo| {};
        unsafe { frame.publish(7, 2, ErasedBody::new(&body)) };
        let participating: Vec<_> = frame.nodes().iter().map(|n| n.participates()).collect();
        assert_eq!(participating, vec![true, true, false, false]);
        assert!(!frame.is_complete());

        assert_eq!(frame.enter(), Some(7));
        for node in &frame.nodes()[..2] {
            assert_eq!(node.claim(1), Some(0));
            node.finish_task();
        }
        frame.leave();
        assert!(frame.is_complete());

        frame.close();
        assert_eq!(frame.enter(), None);
        frame.release();
        assert!(frame.try_acquire());
    }
}
