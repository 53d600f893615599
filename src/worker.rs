//! Worker thread implementation.
//!
//! Workers sit in a polling loop: whenever the pool's job counter moves,
//! they join every open job that still has unclaimed tasks. Between jobs
//! they back off, or sleep while the pool is suspended.

use crate::PinningStrategy;
use crate::context::{self, ThreadIdentity};
use crate::error::{Error, Result};
use crate::task_manager::Shared;
use crate::topology::{NodeLayout, Topology};
use core_affinity::CoreId;
use crossbeam::utils::Backoff;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// A spawned worker thread of a pool.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns worker `identity.thread_nr`, optionally pinned to `core`.
    pub(crate) fn spawn(shared: Arc<Shared>, identity: ThreadIdentity, core: Option<CoreId>) -> Result<Self> {
        let id = identity.thread_nr;
        let handle = thread::Builder::new()
            .name(format!("nodepool-worker-{id}"))
            .spawn(move || {
                if let Some(core) = core {
                    if core_affinity::set_for_current(core) {
                        trace!(worker = id, core = core.id, "pinned worker");
                    } else {
                        debug!(worker = id, core = core.id, "could not pin worker");
                    }
                }
                Worker::run_loop(shared, identity);
            })
            .map_err(|err| Error::Spawn {
                thread_nr: id,
                reason: err.to_string(),
            })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Main loop: wait for the job counter to move, then help until no open
    /// job has work left.
    fn run_loop(shared: Arc<Shared>, identity: ThreadIdentity) {
        let _context = context::install(Arc::clone(&shared), identity);
        let mut seen = 0;
        let backoff = Backoff::new();

        while !shared.done.load(Ordering::Acquire) {
            let jobnr = shared.jobnr();
            if jobnr != seen {
                seen = jobnr;
                shared.help(identity);
                backoff.reset();
                continue;
            }
            shared.idle(&backoff);
        }
        trace!(worker = identity.thread_nr, "worker exiting");
    }

    /// Returns the worker's pool thread number.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// The spawned workers of one task manager.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawns threads `1..num_threads`; thread 0 is whoever submits jobs.
    ///
    /// If a spawn fails, the workers started so far are shut down again.
    pub(crate) fn spawn(shared: &Arc<Shared>, pinning: PinningStrategy, topology: &Topology) -> Result<Self> {
        let layout = shared.layout().clone();
        let core_ids = match pinning {
            PinningStrategy::None => None,
            _ => core_affinity::get_core_ids(),
        };
        if pinning != PinningStrategy::None && core_ids.is_none() {
            warn!(?pinning, "core ids unavailable, workers stay unpinned");
        }

        let mut pool = WorkerPool {
            workers: Vec::with_capacity(layout.num_threads().saturating_sub(1)),
            shared: Arc::clone(shared),
        };
        for thread_nr in 1..layout.num_threads() {
            let core = core_ids
                .as_deref()
                .and_then(|ids| pin_target(pinning, thread_nr, &layout, topology, ids));
            match Worker::spawn(Arc::clone(shared), layout.identity(thread_nr), core) {
                Ok(worker) => pool.workers.push(worker),
                Err(err) => {
                    warn!(thread_nr, %err, "failed to spawn worker, stopping pool");
                    // The spawn error is what the caller needs to see.
                    let _ = pool.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    /// Number of spawned worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signals shutdown and joins all workers.
    ///
    /// Returns the number of workers that panicked as the error. Calling it
    /// again after the workers were joined does nothing.
    pub(crate) fn shutdown(&mut self) -> std::result::Result<(), usize> {
        if self.workers.is_empty() {
            return Ok(());
        }
        self.shared.done.store(true, Ordering::Release);

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                warn!(worker = id, "worker thread panicked");
                panicked += 1;
            }
        }
        if panicked > 0 { Err(panicked) } else { Ok(()) }
    }
}

/// Core for pool thread `thread_nr` under `pinning`, if any.
fn pin_target(
    pinning: PinningStrategy,
    thread_nr: usize,
    layout: &NodeLayout,
    topology: &Topology,
    ids: &[CoreId],
) -> Option<CoreId> {
    match pinning {
        PinningStrategy::None => None,
        PinningStrategy::Linear => ids.get(thread_nr % ids.len().max(1)).copied(),
        // Even logical processors are the first hardware thread of each core.
        PinningStrategy::AvoidSMT => ids.get(thread_nr * 2).copied(),
        PinningStrategy::NodeLocal => {
            let node = layout.node_of(thread_nr);
            let cores = topology.cores_of(node % topology.num_nodes.max(1));
            if cores.is_empty() {
                return None;
            }
            let local = thread_nr - layout.threads_of(node).start;
            let core = cores[local % cores.len()];
            ids.iter().find(|id| id.id == core).copied()
        }
    }
}
