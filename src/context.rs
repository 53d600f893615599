//! Thread-local pool context.
//!
//! Worker threads are bound to their pool for their whole life. Other
//! threads become thread 0 of a pool while they submit a job to it, or for
//! as long as an [`EnterGuard`] is alive. Code that has no [`TaskInfo`] at
//! hand can ask for its identity through the free functions here; outside
//! any pool they report a single thread.
//!
//! [`TaskInfo`]: crate::TaskInfo

use crate::task_manager::Shared;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// Position of a thread within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdentity {
    pub thread_nr: usize,
    pub nthreads: usize,
    pub node_nr: usize,
    pub nnodes: usize,
}

impl ThreadIdentity {
    /// Identity reported outside any pool.
    pub const SOLO: ThreadIdentity = ThreadIdentity {
        thread_nr: 0,
        nthreads: 1,
        node_nr: 0,
        nnodes: 1,
    };
}

struct Current {
    shared: Arc<Shared>,
    identity: ThreadIdentity,
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
    /// Jobs this thread is executing tasks of, innermost last, as (pool key, job id).
    static JOB_STACK: RefCell<Vec<(usize, u64)>> = const { RefCell::new(Vec::new()) };
}

/// Restores the previous context of the thread when dropped.
pub(crate) struct ContextGuard {
    previous: Option<Current>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Makes `shared` the current pool of this thread until the guard drops.
pub(crate) fn install(shared: Arc<Shared>, identity: ThreadIdentity) -> ContextGuard {
    let previous = CURRENT.with(|current| {
        current
            .borrow_mut()
            .replace(Current { shared, identity })
    });
    ContextGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Identity of this thread within `shared`, if it currently belongs to it.
pub(crate) fn identity_in(shared: &Arc<Shared>) -> Option<ThreadIdentity> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .filter(|c| Arc::ptr_eq(&c.shared, shared))
            .map(|c| c.identity)
    })
}

/// The pool this thread currently belongs to.
pub(crate) fn current_pool() -> Option<Arc<Shared>> {
    CURRENT.with(|current| current.borrow().as_ref().map(|c| Arc::clone(&c.shared)))
}

fn current_identity() -> ThreadIdentity {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map_or(ThreadIdentity::SOLO, |c| c.identity)
    })
}

/// Marks the thread as executing a task of `job_id` until dropped.
pub(crate) struct JobScope {
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn push_job(pool_key: usize, job_id: u64) -> JobScope {
    JOB_STACK.with(|stack| stack.borrow_mut().push((pool_key, job_id)));
    JobScope {
        _not_send: PhantomData,
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        JOB_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// True while this thread runs a task of some job of the pool `pool_key`.
pub(crate) fn in_job_of(pool_key: usize) -> bool {
    JOB_STACK.with(|stack| stack.borrow().iter().any(|&(key, _)| key == pool_key))
}

/// Nesting depth of jobs on this thread across all pools.
pub fn job_depth() -> usize {
    JOB_STACK.with(|stack| stack.borrow().len())
}

/// Pool thread number of the calling thread, 0 outside any pool.
pub fn current_thread_id() -> usize {
    current_identity().thread_nr
}

/// Thread count of the calling thread's pool, 1 outside any pool.
pub fn num_threads() -> usize {
    current_identity().nthreads
}

/// Node of the calling thread, 0 outside any pool.
pub fn current_node_id() -> usize {
    current_identity().node_nr
}

/// Node count of the calling thread's pool, 1 outside any pool.
pub fn num_nodes() -> usize {
    current_identity().nnodes
}

/// Keeps a pool current on the thread that called
/// [`TaskManager::enter`](crate::TaskManager::enter).
#[must_use = "the pool is only current while the guard is alive"]
pub struct EnterGuard {
    _guard: ContextGuard,
}

impl EnterGuard {
    pub(crate) fn new(guard: ContextGuard) -> Self {
        EnterGuard { _guard: guard }
    }
}
