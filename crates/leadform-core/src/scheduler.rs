//! Delayed-task scheduling.
//!
//! The controller never sleeps on the wall clock directly. It asks a
//! [`Scheduler`] to run a job after a delay and keeps the returned
//! [`ScheduledTask`] handle so pending work can be cancelled when the
//! controller goes away. [`TokioScheduler`] is the production implementation;
//! [`ManualScheduler`] drives a virtual clock for deterministic tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs after a fixed delay.
pub trait Scheduler: Send + Sync {
    /// Arrange for `job` to run once `delay` has elapsed.
    fn schedule(&self, delay: Duration, job: Job) -> ScheduledTask;
}

/// Cancellation handle for a scheduled job.
///
/// Cancelling after the job already ran is a no-op.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }

    /// Wrap `job` so it is skipped once cancelled and marks the task
    /// finished after running.
    fn guard(&self, job: Job) -> Job {
        let cancelled = Arc::clone(&self.cancelled);
        let finished = Arc::clone(&self.finished);
        Box::new(move || {
            if !cancelled.load(Ordering::SeqCst) {
                job();
                finished.store(true, Ordering::SeqCst);
            }
        })
    }

    /// Prevent the job from running if it has not run yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the job has run to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Neither finished nor cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.is_finished() && !self.is_cancelled()
    }
}

// ── Tokio ────────────────────────────────────────────────────────────

/// Schedules jobs as tokio tasks sleeping on `tokio::time`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Schedule onto the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns the tokio error if called outside a runtime.
    pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> ScheduledTask {
        let mut task = ScheduledTask::new();
        let job = task.guard(job);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            job();
        });
        task.abort = Some(join.abort_handle());
        task
    }
}

// ── Manual clock ─────────────────────────────────────────────────────

struct Entry {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    queue: Vec<Entry>,
}

/// A virtual clock. Jobs run only when [`advance`](Self::advance) moves time
/// past their due instant, in due order, FIFO among equal due instants.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    /// A clock starting at zero with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of jobs that are scheduled and not cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock()
            .queue
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move the clock forward by `by`, running every job that becomes due.
    ///
    /// Jobs scheduled by a running job are eligible in the same call if
    /// they fall due before the new time. Returns the number of jobs run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;

        loop {
            let entry = {
                let mut state = self.lock();
                let next = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.seq))
                    .map(|(idx, _)| idx);
                match next {
                    Some(idx) => {
                        let entry = state.queue.swap_remove(idx);
                        state.now = entry.due;
                        entry
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };

            // Run outside the lock; jobs may schedule more work.
            if !entry.cancelled.load(Ordering::SeqCst) {
                (entry.job)();
                ran += 1;
            }
        }

        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> ScheduledTask {
        let task = ScheduledTask::new();
        let job = task.guard(job);
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.queue.push(Entry {
            due,
            seq,
            cancelled: Arc::clone(&task.cancelled),
            job,
        });
        task
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Job) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |label: &'static str| -> Job {
                let log = Arc::clone(&log);
                Box::new(move || log.lock().unwrap().push(label))
            }
        };
        (log, make)
    }

    #[test]
    fn manual_jobs_wait_for_their_due_time() {
        let clock = ManualScheduler::new();
        let (log, job) = recorder();

        clock.schedule(Duration::from_millis(800), job("redirect"));
        assert_eq!(clock.advance(Duration::from_millis(799)), 0);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(clock.advance(Duration::from_millis(1)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["redirect"]);
        assert_eq!(clock.now(), Duration::from_millis(800));
    }

    #[test]
    fn manual_jobs_run_in_due_then_fifo_order() {
        let clock = ManualScheduler::new();
        let (log, job) = recorder();

        clock.schedule(Duration::from_millis(800), job("b"));
        clock.schedule(Duration::from_millis(100), job("a"));
        clock.schedule(Duration::from_millis(800), job("c"));

        assert_eq!(clock.advance(Duration::from_secs(1)), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cancelled_manual_job_never_runs() {
        let clock = ManualScheduler::new();
        let (log, job) = recorder();

        let task = clock.schedule(Duration::from_millis(10), job("x"));
        assert_eq!(clock.pending(), 1);
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(clock.pending(), 0);

        assert_eq!(clock.advance(Duration::from_secs(1)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn job_scheduled_by_a_job_can_fire_in_same_advance() {
        let clock = ManualScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_clock = clock.clone();
        let inner_count = Arc::clone(&count);
        clock.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                inner_count.fetch_add(1, Ordering::SeqCst);
                let c = Arc::clone(&inner_count);
                inner_clock.schedule(
                    Duration::from_millis(100),
                    Box::new(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        assert_eq!(clock.advance(Duration::from_millis(250)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        scheduler.schedule(
            Duration::from_millis(800),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        tokio::time::sleep(Duration::from_millis(799)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_cancel_aborts_job() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let task = scheduler.schedule(
            Duration::from_millis(800),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        task.cancel();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn tokio_scheduler_requires_a_runtime() {
        assert!(TokioScheduler::current().is_err());
    }
}
