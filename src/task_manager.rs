//! The task manager: a fixed pool of threads executing one job at a time
//! (plus any jobs nested inside its tasks).
//!
//! Submission is a fork-join: [`TaskManager::create_job`] publishes the
//! job, participates in it as thread 0, and returns once every task has
//! finished. Tasks are handed out per node through the counters of a job
//! frame; idle workers find new jobs by watching a single generation
//! counter.

use crate::PinningStrategy;
use crate::context::{self, EnterGuard, ThreadIdentity};
use crate::error::{Error, Result};
use crate::job::{ErasedBody, FailureSlot, JobFrame, Payload, TaskInfo};
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::partitioning::Partitioning;
use crate::range::split;
use crate::topology::{MAX_NODES, NodeLayout, Topology};
use crate::trace::{TraceId, TraceLog, TraceRecorder};
use crate::worker::WorkerPool;
use crossbeam::utils::Backoff;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration of a task manager, fixed once the pool starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Total thread count including the submitting thread. Default: all logical CPUs.
    pub num_threads: usize,
    /// Node count; `None` detects it from the hardware. At most [`MAX_NODES`].
    pub num_nodes: Option<usize>,
    /// How worker threads are pinned to cores.
    pub pinning: PinningStrategy,
    /// Initial sleep between polls of waiting workers, in microseconds.
    /// 0 keeps them spinning. See [`TaskManager::suspend`].
    pub sleep_usecs: u64,
    /// Record task and job spans from the start.
    pub trace: bool,
    /// Per-thread trace buffer cap; tracing stops once a buffer is full.
    pub max_trace_events_per_thread: usize,
    /// Jobs that may be in flight at once, counting nested ones. Further
    /// nested jobs run on their submitting thread alone.
    pub max_nested_jobs: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            num_nodes: None,
            pinning: PinningStrategy::None,
            sleep_usecs: 0,
            trace: false,
            max_trace_events_per_thread: 100_000,
            max_nested_jobs: 16,
        }
    }
}

impl PoolConfig {
    /// Validates the configuration and lays the threads out over nodes.
    pub fn resolve(&self) -> Result<(NodeLayout, Topology)> {
        if self.num_threads == 0 {
            return Err(Error::NoThreads);
        }
        match self.num_nodes {
            Some(0) => return Err(Error::NoNodes),
            Some(requested) if requested > MAX_NODES => {
                return Err(Error::TooManyNodes {
                    requested,
                    max: MAX_NODES,
                });
            }
            _ => {}
        }

        let topology = if self.num_nodes.is_none() || self.pinning != PinningStrategy::None {
            Topology::detect()
        } else {
            Topology::uniform(self.num_threads)
        };
        let nnodes = self.num_nodes.unwrap_or(topology.num_nodes).min(MAX_NODES);
        Ok((NodeLayout::new(self.num_threads, nnodes), topology))
    }
}

/// State shared between the task manager handle and its workers.
pub(crate) struct Shared {
    layout: NodeLayout,
    frames: Box<[JobFrame]>,
    /// Bumped once per published job; the only wake-up signal for workers.
    jobnr: AtomicU64,
    next_job_id: AtomicU64,
    pub(crate) done: AtomicBool,
    sleep_usecs: AtomicU64,
    active_workers: AtomicUsize,
    /// Serialises top-level submitters.
    external: Mutex<()>,
    trace: TraceRecorder,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

impl Shared {
    fn new(layout: NodeLayout, config: &PoolConfig) -> Self {
        let nnodes = layout.num_nodes();
        let nthreads = layout.num_threads();
        Shared {
            frames: (0..config.max_nested_jobs.max(1))
                .map(|_| JobFrame::new(nnodes))
                .collect(),
            jobnr: AtomicU64::new(0),
            next_job_id: AtomicU64::new(0),
            done: AtomicBool::new(false),
            sleep_usecs: AtomicU64::new(config.sleep_usecs),
            active_workers: AtomicUsize::new(0),
            external: Mutex::new(()),
            trace: TraceRecorder::new(
                nthreads,
                config.trace,
                config.max_trace_events_per_thread,
            ),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
            layout,
        }
    }

    fn key(&self) -> usize {
        self as *const Shared as usize
    }

    pub(crate) fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub(crate) fn num_threads(&self) -> usize {
        self.layout.num_threads()
    }

    pub(crate) fn jobnr(&self) -> u64 {
        self.jobnr.load(Ordering::Acquire)
    }

    /// Runs a job, rejecting empty ones before touching any state.
    pub(crate) fn run_job<F>(self: &Arc<Self>, ntasks: usize, body: &F) -> Result<()>
    where
        F: Fn(&TaskInfo) + Sync,
    {
        if ntasks == 0 {
            return Err(Error::NoTasks);
        }
        self.run_tasks(ntasks, body);
        Ok(())
    }

    /// Runs `ntasks >= 1` tasks of `body` and re-raises the first panic.
    pub(crate) fn run_tasks<F>(self: &Arc<Self>, ntasks: usize, body: &F)
    where
        F: Fn(&TaskInfo) + Sync,
    {
        debug_assert!(ntasks > 0);
        if let Some(payload) = self.dispatch(ntasks, body) {
            panic::resume_unwind(payload);
        }
    }

    fn dispatch<F>(self: &Arc<Self>, ntasks: usize, body: &F) -> Option<Payload>
    where
        F: Fn(&TaskInfo) + Sync,
    {
        let nested = context::in_job_of(self.key());
        // Nested submissions already run under the lock of their top-level job.
        let _serial = (!nested).then(|| self.external.lock().unwrap_or_else(PoisonError::into_inner));
        let (me, _context) = match context::identity_in(self) {
            Some(identity) => (identity, None),
            None => {
                let identity = self.layout.identity(0);
                (identity, Some(context::install(Arc::clone(self), identity)))
            }
        };

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;
        let _span = self.trace.job_span(job_id, std::any::type_name::<F>());
        #[cfg(feature = "metrics")]
        if nested {
            Metrics::add(&self.metrics.nested_jobs, 1);
        }

        let body = ErasedBody::new(body);
        let failure = if self.layout.num_threads() == 1 {
            self.run_inline(job_id, ntasks, body, me)
        } else {
            match self.frames.iter().find(|frame| frame.try_acquire()) {
                Some(frame) => self.run_parallel(frame, job_id, ntasks, body, me),
                None => {
                    debug!(job_id, ntasks, "all job frames busy, running job on the submitting thread");
                    #[cfg(feature = "metrics")]
                    Metrics::add(&self.metrics.sequential_fallbacks, 1);
                    self.run_inline(job_id, ntasks, body, me)
                }
            }
        };

        #[cfg(feature = "metrics")]
        Metrics::add(&self.metrics.jobs_completed, 1);
        failure
    }

    fn run_parallel(
        &self,
        frame: &JobFrame,
        job_id: u64,
        ntasks: usize,
        body: ErasedBody,
        me: ThreadIdentity,
    ) -> Option<Payload> {
        // SAFETY: the frame was just acquired and is closed; `body` lives on
        // the caller's stack until `dispatch` returns, after the guard closed it.
        unsafe { frame.publish(job_id, ntasks, body) };
        let owned = OwnedFrame { frame };
        self.jobnr.fetch_add(1, Ordering::Release);

        self.work_on(frame, job_id, me);

        owned.wait_complete();
        frame.close();
        frame.failure.take()
    }

    fn run_inline(
        &self,
        job_id: u64,
        ntasks: usize,
        body: ErasedBody,
        me: ThreadIdentity,
    ) -> Option<Payload> {
        let failures = FailureSlot::new();
        for task_nr in 0..ntasks {
            let info = task_info(task_nr, ntasks, me);
            self.execute(job_id, &info, body, &failures);
        }
        failures.take()
    }

    /// Claims and runs tasks of an open frame, own node first.
    fn work_on(&self, frame: &JobFrame, job_id: u64, me: ThreadIdentity) {
        // SAFETY: callers own the open frame or are registered on it.
        let Some(body) = (unsafe { frame.body() }) else {
            return;
        };
        let ntasks = frame.ntasks();
        let nodes = frame.nodes();
        let nnodes = nodes.len();

        for offset in 0..nnodes {
            let node_nr = (me.node_nr + offset) % nnodes;
            let node = &nodes[node_nr];
            if !node.participates() {
                continue;
            }
            let share = split(0..ntasks, node_nr, nnodes);
            while let Some(local) = node.claim(share.len()) {
                let info = task_info(share.start + local, ntasks, me);
                self.execute(job_id, &info, body, &frame.failure);
                node.finish_task();
            }
        }
    }

    fn execute(&self, job_id: u64, info: &TaskInfo, body: ErasedBody, failures: &FailureSlot<Payload>) {
        let _scope = context::push_job(self.key(), job_id);
        let _span = self
            .trace
            .task_span(info.thread_nr, TraceId::Job(job_id), info.task_nr as i64);

        // SAFETY: the job cannot complete while this claimed task is unfinished,
        // so its body is still alive.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { body.invoke(info) }));
        #[cfg(feature = "metrics")]
        Metrics::add(&self.metrics.tasks_executed, 1);

        if let Err(payload) = result
            && !failures.record(payload)
        {
            warn!(
                job_id,
                task_nr = info.task_nr,
                "task panicked after an earlier task of the same job, discarding its panic"
            );
            #[cfg(feature = "metrics")]
            Metrics::add(&self.metrics.panics_suppressed, 1);
        }
    }

    /// Joins every open job with free tasks. Called by waiting workers.
    pub(crate) fn help(&self, me: ThreadIdentity) {
        for frame in self.frames.iter() {
            let Some(job_id) = frame.enter() else {
                continue;
            };
            self.active_workers.fetch_add(1, Ordering::Relaxed);
            self.work_on(frame, job_id, me);
            self.active_workers.fetch_sub(1, Ordering::Relaxed);
            frame.leave();
        }
    }

    /// One polling step of a waiting worker.
    pub(crate) fn idle(&self, backoff: &Backoff) {
        match self.sleep_usecs.load(Ordering::Relaxed) {
            0 => backoff.snooze(),
            usecs => thread::sleep(Duration::from_micros(usecs)),
        }
    }

    /// Runs `body(i)` for every index of `range`, statically split over `ntasks` tasks.
    pub(crate) fn for_each_index<F>(self: &Arc<Self>, range: Range<usize>, ntasks: usize, body: &F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        self.run_job(ntasks, &|ti: &TaskInfo| {
            for i in ti.split(range.clone()) {
                body(i);
            }
        })
    }

    /// Runs `body` once per task with the task's share of `range`.
    pub(crate) fn for_each_range<F>(self: &Arc<Self>, range: Range<usize>, ntasks: usize, body: &F) -> Result<()>
    where
        F: Fn(Range<usize>) + Sync,
    {
        self.run_job(ntasks, &|ti: &TaskInfo| body(ti.split(range.clone())))
    }

    /// Runs `body(i)` over a partitioning, `ntasks / part.size()` tasks per bucket.
    pub(crate) fn for_each_partitioned<F>(self: &Arc<Self>, part: &Partitioning, ntasks: usize, body: &F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        let tasks_per_part = part.tasks_per_bucket(ntasks)?;
        self.run_job(ntasks, &|ti: &TaskInfo| {
            let bucket = part.bucket(ti.task_nr / tasks_per_part);
            for i in split(bucket, ti.task_nr % tasks_per_part, tasks_per_part) {
                body(i);
            }
        })
    }
}

fn task_info(task_nr: usize, ntasks: usize, me: ThreadIdentity) -> TaskInfo {
    TaskInfo {
        task_nr,
        ntasks,
        thread_nr: me.thread_nr,
        nthreads: me.nthreads,
        node_nr: me.node_nr,
        nnodes: me.nnodes,
    }
}

/// Closes and frees an acquired frame even if the submitter unwinds.
struct OwnedFrame<'a> {
    frame: &'a JobFrame,
}

impl OwnedFrame<'_> {
    fn wait_complete(&self) {
        let backoff = Backoff::new();
        while !self.frame.is_complete() {
            backoff.snooze();
        }
    }
}

impl Drop for OwnedFrame<'_> {
    fn drop(&mut self) {
        self.wait_complete();
        self.frame.close();
        self.frame.release();
    }
}

/// A pool of persistent worker threads executing fork-join jobs.
///
/// The thread that submits a job takes part in it as thread 0, so a pool of
/// `n` threads spawns `n - 1` workers. Only one thread at a time may submit
/// top-level jobs; a second submitter blocks until the first job returns.
/// Task bodies may submit nested jobs to the same pool.
///
/// # Example
///
/// ```
/// use nodepool::TaskManager;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let pool = TaskManager::new(4).unwrap();
/// let sum = AtomicUsize::new(0);
/// pool.create_job(10, |ti| {
///     sum.fetch_add(ti.task_nr, Ordering::Relaxed);
/// })
/// .unwrap();
/// assert_eq!(sum.load(Ordering::Relaxed), 45);
/// pool.stop().unwrap();
/// ```
pub struct TaskManager {
    shared: Arc<Shared>,
    workers: WorkerPool,
}

impl TaskManager {
    /// Starts a pool of `num_threads` threads (including the submitting one).
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::start(PoolConfig {
            num_threads,
            ..Default::default()
        })
    }

    /// Starts a pool with one thread per logical CPU.
    pub fn with_default_threads() -> Result<Self> {
        Self::start(PoolConfig::default())
    }

    /// Starts a pool from an explicit configuration.
    pub fn start(config: PoolConfig) -> Result<Self> {
        let (layout, topology) = config.resolve()?;
        let shared = Arc::new(Shared::new(layout, &config));
        let workers = WorkerPool::spawn(&shared, config.pinning, &topology)?;
        info!(
            threads = shared.layout.num_threads(),
            nodes = shared.layout.num_nodes(),
            pinning = ?config.pinning,
            "task manager started"
        );
        Ok(TaskManager { shared, workers })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Number of pool threads, the submitting thread included.
    pub fn num_threads(&self) -> usize {
        self.shared.layout.num_threads()
    }

    pub fn num_nodes(&self) -> usize {
        self.shared.layout.num_nodes()
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.shared.layout
    }

    /// Number of spawned worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.size()
    }

    /// Workers currently taking part in a job.
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Relaxed)
    }

    /// Runs `body` once for every task number in `0..ntasks` and returns
    /// when all of them finished.
    ///
    /// If task bodies panic, every other task still runs; the first panic
    /// is then resumed on the calling thread and later ones are logged and
    /// dropped. Requesting zero tasks is rejected with [`Error::NoTasks`].
    pub fn create_job<F>(&self, ntasks: usize, body: F) -> Result<()>
    where
        F: Fn(&TaskInfo) + Sync,
    {
        self.shared.run_job(ntasks, &body)
    }

    /// Like [`create_job`](Self::create_job) for fallible bodies.
    ///
    /// All tasks run even after one fails. The first error is returned;
    /// errors of later tasks are dropped.
    pub fn try_create_job<F, E>(&self, ntasks: usize, body: F) -> std::result::Result<(), E>
    where
        F: Fn(&TaskInfo) -> std::result::Result<(), E> + Sync,
        E: From<Error> + Send,
    {
        let first = FailureSlot::new();
        self.shared.run_job(ntasks, &|ti: &TaskInfo| {
            if let Err(err) = body(ti) {
                first.record(err);
            }
        })?;
        let dropped = first.suppressed();
        if dropped > 0 {
            debug!(dropped, "dropped errors of later failing tasks");
        }
        match first.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Calls `body(i)` for every `i` in `range`, split statically over `ntasks` tasks.
    pub fn parallel_for<F>(&self, range: Range<usize>, ntasks: usize, body: F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        self.shared.for_each_index(range, ntasks, &body)
    }

    /// Calls `body` once per task with the task's share of `range`.
    pub fn parallel_for_range<F>(&self, range: Range<usize>, ntasks: usize, body: F) -> Result<()>
    where
        F: Fn(Range<usize>) + Sync,
    {
        self.shared.for_each_range(range, ntasks, &body)
    }

    /// Calls `body(i)` for every index covered by `part`.
    ///
    /// Each bucket is split over `ntasks / part.size()` tasks; `ntasks` must
    /// be a multiple of the partition size.
    pub fn parallel_for_partitioned<F>(&self, part: &Partitioning, ntasks: usize, body: F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        self.shared.for_each_partitioned(part, ntasks, &body)
    }

    /// Lets waiting workers sleep `sleep` between polls instead of spinning.
    pub fn suspend(&self, sleep: Duration) {
        let usecs = u64::try_from(sleep.as_micros()).unwrap_or(u64::MAX).max(1);
        self.shared.sleep_usecs.store(usecs, Ordering::Relaxed);
        debug!(usecs, "workers suspended");
    }

    /// Returns waiting workers to spinning.
    pub fn resume(&self) {
        self.shared.sleep_usecs.store(0, Ordering::Relaxed);
        debug!("workers resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.sleep_usecs.load(Ordering::Relaxed) != 0
    }

    /// Makes this pool current on the calling thread until the guard drops,
    /// so the free functions in [`crate::parallel`] use it.
    ///
    /// Threads outside the pool enter as thread 0. Threads already in the
    /// pool keep their identity.
    pub fn enter(&self) -> EnterGuard {
        let identity = context::identity_in(&self.shared)
            .unwrap_or_else(|| self.shared.layout.identity(0));
        EnterGuard::new(context::install(Arc::clone(&self.shared), identity))
    }

    /// Runs `f` with this pool current on the calling thread.
    pub fn run_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.shared.trace
    }

    /// Drains the recorded trace events.
    pub fn take_trace(&self) -> TraceLog {
        self.shared.trace.take()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stops the pool and joins every worker thread.
    ///
    /// Returns an error carrying the number of worker threads that panicked.
    pub fn stop(mut self) -> Result<()> {
        self.workers.shutdown().map_err(Error::WorkersPanicked)?;
        info!("task manager stopped");
        Ok(())
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        // Already stopped pools have nothing left to join.
        if let Err(panicked) = self.workers.shutdown() {
            warn!(panicked, "task manager dropped with panicked worker threads");
        }
    }
}
