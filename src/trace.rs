//! Task and job trace recording.
//!
//! The recorder keeps one append-only buffer per pool thread plus one for
//! jobs. Each buffer is only written by its own thread, so the locks are
//! uncontended. Once any buffer reaches the configured cap, tracing turns
//! itself off instead of growing without bound. Sorting and writing the
//! events in a trace file format is left to the consumer of [`TraceLog`].

use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::warn;

/// What a recorded task span belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceId {
    None,
    /// A task of the job with this id.
    Job(u64),
    /// A user timer.
    Timer(u64),
}

/// One task (or timer) span on one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub thread_id: usize,
    pub id: TraceId,
    /// Free-form tag; the task number for job tasks.
    pub additional_value: i64,
    /// Nanoseconds since the recorder was created.
    pub start_ns: u64,
    pub stop_ns: u64,
}

/// One job, from publication until the submitter returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub job_id: u64,
    /// Type name of the job body.
    pub type_name: &'static str,
    pub start_ns: u64,
    pub stop_ns: u64,
}

/// Unordered events drained from a [`TraceRecorder`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceLog {
    pub tasks: Vec<TaskEvent>,
    pub jobs: Vec<JobEvent>,
}

pub struct TraceRecorder {
    enabled: AtomicBool,
    paused: AtomicUsize,
    origin: Instant,
    max_events_per_thread: usize,
    tasks: Box<[CachePadded<Mutex<Vec<TaskEvent>>>]>,
    jobs: Mutex<Vec<JobEvent>>,
}

impl TraceRecorder {
    pub fn new(nthreads: usize, enabled: bool, max_events_per_thread: usize) -> Self {
        TraceRecorder {
            enabled: AtomicBool::new(enabled && max_events_per_thread > 0),
            paused: AtomicUsize::new(0),
            origin: Instant::now(),
            max_events_per_thread,
            tasks: (0..nthreads.max(1))
                .map(|_| CachePadded::new(Mutex::new(Vec::new())))
                .collect(),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Whether new spans are currently recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && self.paused.load(Ordering::Relaxed) == 0
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled
            .store(enabled && self.max_events_per_thread > 0, Ordering::Relaxed);
    }

    /// Suspends recording until the returned guard drops. Guards nest.
    pub fn pause(&self) -> TracePause<'_> {
        self.paused.fetch_add(1, Ordering::Relaxed);
        TracePause { recorder: self }
    }

    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Starts a span on `thread_id`, recorded when the returned guard drops.
    pub fn task_span(&self, thread_id: usize, id: TraceId, additional_value: i64) -> Option<TaskSpan<'_>> {
        if !self.is_enabled() || thread_id >= self.tasks.len() {
            return None;
        }
        Some(TaskSpan {
            recorder: self,
            thread_id,
            id,
            additional_value,
            start_ns: self.now_ns(),
        })
    }

    /// Starts a user timer span on `thread_id`.
    pub fn timer_span(&self, thread_id: usize, timer_id: u64) -> Option<TaskSpan<'_>> {
        self.task_span(thread_id, TraceId::Timer(timer_id), -1)
    }

    pub(crate) fn job_span(&self, job_id: u64, type_name: &'static str) -> Option<JobSpan<'_>> {
        if !self.is_enabled() {
            return None;
        }
        Some(JobSpan {
            recorder: self,
            job_id,
            type_name,
            start_ns: self.now_ns(),
        })
    }

    fn push<T>(&self, buffer: &Mutex<Vec<T>>, event: T) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let mut events = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events_per_thread {
            drop(events);
            self.stop_tracing();
            return;
        }
        events.push(event);
    }

    fn stop_tracing(&self) {
        if self.enabled.swap(false, Ordering::Relaxed) {
            warn!(
                max_events_per_thread = self.max_events_per_thread,
                "maximum number of trace events reached, tracing is stopped now"
            );
        }
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        let tasks: usize = self
            .tasks
            .iter()
            .map(|b| b.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum();
        tasks + self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every buffered event.
    pub fn take(&self) -> TraceLog {
        let tasks = self
            .tasks
            .iter()
            .flat_map(|b| std::mem::take(&mut *b.lock().unwrap_or_else(PoisonError::into_inner)))
            .collect();
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap_or_else(PoisonError::into_inner));
        TraceLog { tasks, jobs }
    }
}

/// RAII span for one task or timer.
pub struct TaskSpan<'a> {
    recorder: &'a TraceRecorder,
    thread_id: usize,
    id: TraceId,
    additional_value: i64,
    start_ns: u64,
}

impl Drop for TaskSpan<'_> {
    fn drop(&mut self) {
        let event = TaskEvent {
            thread_id: self.thread_id,
            id: self.id,
            additional_value: self.additional_value,
            start_ns: self.start_ns,
            stop_ns: self.recorder.now_ns(),
        };
        self.recorder.push(&self.recorder.tasks[self.thread_id], event);
    }
}

/// RAII span for one job.
pub(crate) struct JobSpan<'a> {
    recorder: &'a TraceRecorder,
    job_id: u64,
    type_name: &'static str,
    start_ns: u64,
}

impl Drop for JobSpan<'_> {
    fn drop(&mut self) {
        let event = JobEvent {
            job_id: self.job_id,
            type_name: self.type_name,
            start_ns: self.start_ns,
            stop_ns: self.recorder.now_ns(),
        };
        self.recorder.push(&self.recorder.jobs, event);
    }
}

/// Guard returned by [`TraceRecorder::pause`].
pub struct TracePause<'a> {
    recorder: &'a TraceRecorder,
}

impl Drop for TracePause<'_> {
    fn drop(&mut self) {
        self.recorder.paused.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_recorder_records_nothing() {
        let recorder = TraceRecorder::new(2, false, 100);
        assert!(recorder.task_span(0, TraceId::None, 0).is_none());
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_span_records_on_drop() {
        let recorder = TraceRecorder::new(2, true, 100);
        {
            let _span = recorder.task_span(1, TraceId::Job(3), 7);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let log = recorder.take();
        assert_eq!(log.tasks.len(), 1);
        let event = &log.tasks[0];
        assert_eq!(event.thread_id, 1);
        assert_eq!(event.id, TraceId::Job(3));
        assert_eq!(event.additional_value, 7);
        assert!(event.stop_ns > event.start_ns);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_timestamps_increase_per_thread() {
        let recorder = TraceRecorder::new(1, true, 100);
        for i in 0..10 {
            let _span = recorder.task_span(0, TraceId::None, i);
        }
        let log = recorder.take();
        for pair in log.tasks.windows(2) {
            assert!(pair[1].start_ns >= pair[0].stop_ns);
        }
    }

    #[test]
    fn test_cap_disables_tracing() {
        let recorder = TraceRecorder::new(1, true, 3);
        for i in 0..10 {
            let _span = recorder.task_span(0, TraceId::None, i);
        }
        assert!(!recorder.is_enabled());
        assert_eq!(recorder.take().tasks.len(), 3);
    }

    #[test]
    fn test_pause_suppresses_spans() {
        let recorder = TraceRecorder::new(1, true, 10);
        {
            let _pause = recorder.pause();
            assert!(recorder.timer_span(0, 1).is_none());
        }
        assert!(recorder.timer_span(0, 1).is_some());
    }

    #[test]
    fn test_job_span() {
        let recorder = TraceRecorder::new(1, true, 10);
        drop(recorder.job_span(5, "demo"));
        let log = recorder.take();
        assert_eq!(log.jobs.len(), 1);
        assert_eq!(log.jobs[0].job_id, 5);
        assert_eq!(log.jobs[0].type_name, "demo");
    }
}
