//! # Worker Pool Module
//!
//! A fixed set of worker threads pulling jobs from one bounded queue. The
//! pool caps how many handler executions run at once; when the queue is full
//! the configured [`BackpressureMode`] decides whether `submit` gives up at
//! once or waits a bounded time for space.
//!
//! ## Lifecycle
//!
//! - `submit` is accepted until [`WorkerPool::shutdown`] begins; afterwards it
//!   fails with [`PoolError::Closed`].
//! - Shutdown lets workers finish everything already queued. If the deadline
//!   passes first, nothing further is started and every job that was queued or
//!   still running is listed in the [`PoolShutdownReport`].
//!
//! ## Configuration
//!
//! [`WorkerPoolConfig`] is normally derived from
//! [`EngineConfig`](crate::runtime_config::EngineConfig), which reads
//! `NEURITE_WORKERS`, `NEURITE_QUEUE_CAPACITY`, `NEURITE_BACKPRESSURE_MODE`,
//! `NEURITE_BACKPRESSURE_TIMEOUT_MS` and `NEURITE_STACK_SIZE`.

use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::ids::JobId;

/// How often an idle worker wakes up to look at the shutdown flag.
const IDLE_TICK: Duration = Duration::from_millis(20);

/// How long shutdown waits for jobs caught between the queue and a worker.
const HANDOFF_GRACE: Duration = Duration::from_millis(100);

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Fail immediately with [`PoolError::QueueFull`].
    #[default]
    #[serde(alias = "shed")]
    Reject,
    /// Wait up to the backpressure timeout for space, then fail.
    Block,
}

impl FromStr for BackpressureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" | "shed" => Ok(Self::Reject),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown backpressure mode '{other}'")),
        }
    }
}

/// Configuration for a worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Maximum number of queued (not yet running) jobs
    pub queue_capacity: usize,
    /// Backpressure mode
    pub backpressure_mode: BackpressureMode,
    /// Timeout for block mode in milliseconds
    pub backpressure_timeout_ms: u64,
    /// Stack size for worker threads
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Create a custom configuration
    pub fn new(
        num_workers: usize,
        queue_capacity: usize,
        backpressure_mode: BackpressureMode,
        backpressure_timeout_ms: u64,
        stack_size: usize,
    ) -> Self {
        Self {
            num_workers,
            queue_capacity,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_capacity: 1024,
            backpressure_mode: BackpressureMode::Reject,
            backpressure_timeout_ms: 50,
            stack_size: 0x40000, // 256KB
        }
    }
}

/// A unit of work owned by the pool from `submit` until a worker finishes it.
pub struct Job {
    id: JobId,
    label: String,
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: JobId::next(),
            label: label.into(),
            task: Box::new(task),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Where an abandoned job was when the shutdown deadline hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Never started; it will not run.
    Queued,
    /// Still executing on a worker thread that was left behind.
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedJob {
    pub id: JobId,
    pub label: String,
    pub state: JobState,
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolShutdownReport {
    /// Jobs finished between the start of shutdown and its return.
    pub completed_during_drain: u64,
    /// Empty when every worker drained before the deadline.
    pub abandoned: Vec<AbandonedJob>,
    pub elapsed: Duration,
}

impl PoolShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub active: usize,
    pub queued: usize,
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
    peak_active: AtomicUsize,
}

impl WorkerPoolMetrics {
    fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    fn record_active(&self, active: usize) {
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    /// Jobs accepted by `submit`
    pub fn get_submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs that ran to the end, panicking ones included
    pub fn get_completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Submissions refused because the queue was full
    pub fn get_rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn get_panicked_count(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Highest number of jobs observed running at once
    pub fn get_peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }
}

/// Jobs a worker has claimed, guarded together with the abandon flag so a
/// job is either registered as running or reported, never neither.
#[derive(Debug, Default)]
struct InFlight {
    abandon: bool,
    running: HashMap<JobId, String>,
    /// Claimed by a worker after the abandon flag was raised.
    late: Vec<AbandonedJob>,
}

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    /// Reserved by `submit` before sending, released once a worker claims the
    /// job or shutdown drains it. Counts jobs in the channel and in transit.
    queued: AtomicUsize,
    active: AtomicUsize,
    inflight: Mutex<InFlight>,
    metrics: WorkerPoolMetrics,
}

/// A fixed-size thread pool with a bounded queue and backpressure
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    exits: Receiver<usize>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads.
    ///
    /// Fails if a thread cannot be spawned; workers that did start are told to
    /// exit.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let num_workers = config.num_workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (sender, receiver) = flume::bounded::<Job>(queue_capacity);
        let (exit_tx, exits) = flume::unbounded::<usize>();
        let shared = Arc::new(Shared::default());

        info!(
            num_workers = num_workers,
            queue_capacity = queue_capacity,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = receiver.clone();
            let shared_clone = Arc::clone(&shared);
            let exit_tx = exit_tx.clone();

            let spawn_result = std::thread::Builder::new()
                .name(format!("neurite-worker-{worker_id}"))
                .stack_size(config.stack_size)
                .spawn(move || {
                    worker_loop(worker_id, &rx, &shared_clone);
                    let _ = exit_tx.send(worker_id);
                });

            match spawn_result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(
                        worker_id = worker_id,
                        error = %e,
                        "Failed to spawn worker thread"
                    );
                    shared.closed.store(true, Ordering::SeqCst);
                    return Err(PoolError::SpawnFailed(e));
                }
            }
        }

        Ok(Self {
            config: WorkerPoolConfig {
                num_workers,
                queue_capacity,
                ..config
            },
            sender,
            receiver,
            shared,
            handles: Mutex::new(handles),
            exits,
        })
    }

    /// Hand a job to the pool.
    ///
    /// On `Err` the job has been dropped without running.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        // Reserve before checking `closed`; shutdown stores `closed` before it
        // reads `queued`, so either we see the flag or it sees the reservation.
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }

        let job_id = job.id;
        let sent = match self.config.backpressure_mode {
            BackpressureMode::Reject => self.sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => self.queue_full(),
                TrySendError::Disconnected(_) => PoolError::Closed,
            }),
            BackpressureMode::Block => self
                .sender
                .send_timeout(
                    job,
                    Duration::from_millis(self.config.backpressure_timeout_ms),
                )
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => self.queue_full(),
                    SendTimeoutError::Disconnected(_) => PoolError::Closed,
                }),
        };

        match sent {
            Ok(()) => {
                self.shared.metrics.record_submit();
                debug!(job_id = %job_id, "Job queued");
                Ok(())
            }
            Err(e) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn queue_full(&self) -> PoolError {
        self.shared.metrics.record_reject();
        warn!(
            queue_capacity = self.config.queue_capacity,
            backpressure_mode = ?self.config.backpressure_mode,
            "Worker queue full, rejecting job"
        );
        PoolError::QueueFull {
            capacity: self.config.queue_capacity,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.config.num_workers,
            active: self.shared.active.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
        }
    }

    pub fn metrics(&self) -> &WorkerPoolMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Close the pool and drain it, waiting at most `timeout`.
    ///
    /// Queued jobs keep running until the deadline. At the deadline no further
    /// job is started; anything still queued or running is returned as
    /// abandoned and the threads of running jobs are detached. A second call
    /// finds no workers and returns an empty report.
    pub fn shutdown(&self, timeout: Duration) -> PoolShutdownReport {
        let started = Instant::now();
        let deadline = started + timeout;
        let completed_before = self.shared.metrics.get_completed_count();
        self.shared.closed.store(true, Ordering::SeqCst);

        let handles = std::mem::take(&mut *self.handles.lock());
        info!(
            workers = handles.len(),
            queued = self.shared.queued.load(Ordering::SeqCst),
            active = self.shared.active.load(Ordering::SeqCst),
            timeout_ms = timeout.as_millis() as u64,
            "Worker pool draining"
        );

        let mut exited = 0;
        while exited < handles.len() {
            match self.exits.recv_deadline(deadline) {
                Ok(worker_id) => {
                    debug!(worker_id = worker_id, "Worker exited");
                    exited += 1;
                }
                Err(_) => break,
            }
        }

        let abandoned = if exited == handles.len() {
            for handle in handles {
                let _ = handle.join();
            }
            Vec::new()
        } else {
            self.abandon_remaining()
        };

        let report = PoolShutdownReport {
            completed_during_drain: self
                .shared
                .metrics
                .get_completed_count()
                .saturating_sub(completed_before),
            abandoned,
            elapsed: started.elapsed(),
        };

        if report.is_clean() {
            info!(
                completed = report.completed_during_drain,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Worker pool drained"
            );
        } else {
            warn!(
                completed = report.completed_during_drain,
                abandoned = report.abandoned.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Worker pool shutdown deadline reached, jobs abandoned"
            );
        }
        report
    }

    fn abandon_remaining(&self) -> Vec<AbandonedJob> {
        let mut abandoned: Vec<AbandonedJob> = {
            let mut inflight = self.shared.inflight.lock();
            inflight.abandon = true;
            inflight
                .running
                .iter()
                .map(|(id, label)| AbandonedJob {
                    id: *id,
                    label: label.clone(),
                    state: JobState::Running,
                })
                .collect()
        };

        // Reservations cover jobs a sender has not pushed yet and jobs a worker
        // has received but not registered; wait briefly for those to settle.
        let grace = Instant::now() + HANDOFF_GRACE;
        loop {
            while let Ok(job) = self.receiver.try_recv() {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                abandoned.push(AbandonedJob {
                    id: job.id,
                    label: job.label,
                    state: JobState::Queued,
                });
            }
            if self.shared.queued.load(Ordering::SeqCst) == 0 || Instant::now() >= grace {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        abandoned.append(&mut self.shared.inflight.lock().late);
        abandoned.sort_by_key(|job| job.id);
        abandoned
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit once the queue is empty; do not block here.
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

fn worker_loop(worker_id: usize, rx: &Receiver<Job>, shared: &Shared) {
    debug!(worker_id = worker_id, "Worker thread started");

    loop {
        if shared.closed.load(Ordering::SeqCst) && shared.queued.load(Ordering::SeqCst) == 0 {
            break;
        }

        let job = match rx.recv_timeout(IDLE_TICK) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        {
            let mut inflight = shared.inflight.lock();
            shared.queued.fetch_sub(1, Ordering::SeqCst);
            if inflight.abandon {
                inflight.late.push(AbandonedJob {
                    id: job.id,
                    label: job.label,
                    state: JobState::Queued,
                });
                break;
            }
            inflight.running.insert(job.id, job.label.clone());
        }

        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.metrics.record_active(active);

        let Job { id, label, task } = job;
        debug!(job_id = %id, label = %label, worker_id = worker_id, "Worker processing job");

        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            shared.metrics.record_panic();
            error!(
                job_id = %id,
                label = %label,
                worker_id = worker_id,
                panic_message = ?panic_message(&panic),
                "Job panicked"
            );
        }

        shared.active.fetch_sub(1, Ordering::SeqCst);
        shared.metrics.record_completion();

        let abandoned = {
            let mut inflight = shared.inflight.lock();
            inflight.running.remove(&id);
            inflight.abandon
        };
        if abandoned {
            break;
        }
    }

    debug!(worker_id = worker_id, "Worker thread exiting");
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
