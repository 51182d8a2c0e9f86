//! # Shutdown Coordination
//!
//! The engine moves through `Running -> Draining -> Stopped`, once.
//!
//! ```text
//! signal / explicit call
//!     -> transports stop accepting
//!     -> new requests answer 503
//!     -> worker pool drains (bounded)
//!     -> inline requests finish (bounded)
//!     -> context pool released
//!     -> Stopped, transports notified with the report
//! ```
//!
//! Work still running at the deadline is listed in the [`ShutdownReport`];
//! nothing is dropped without being accounted for.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::context::ContextPool;
use crate::server::Transport;
use crate::worker_pool::{PoolShutdownReport, WorkerPool};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct LifecycleInner {
    state: EngineState,
    in_flight: usize,
}

/// Lifecycle state plus the count of requests inside `serve`.
///
/// Both live under one lock so a request is either admitted before draining
/// starts, and therefore waited for, or refused.
#[derive(Debug)]
pub struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: EngineState::Running,
                in_flight: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Admit one request, or `None` once draining has begun.
    pub fn enter(&self) -> Option<InFlightGuard<'_>> {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::Running {
            return None;
        }
        inner.in_flight += 1;
        Some(InFlightGuard { lifecycle: self })
    }

    /// `Running -> Draining`. Returns `false` if that already happened.
    pub(crate) fn begin_drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != EngineState::Running {
            return false;
        }
        inner.state = EngineState::Draining;
        self.changed.notify_all();
        true
    }

    /// Wait until no request is in flight or `deadline` passes.
    /// Returns the number still in flight.
    pub fn wait_idle(&self, deadline: Instant) -> usize {
        let mut inner = self.inner.lock();
        while inner.in_flight > 0 {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.in_flight
    }

    fn mark_stopped(&self) {
        self.inner.lock().state = EngineState::Stopped;
        self.changed.notify_all();
    }

    /// Block until the engine is `Stopped`.
    pub fn wait_stopped(&self) {
        let mut inner = self.inner.lock();
        while inner.state != EngineState::Stopped {
            self.changed.wait(&mut inner);
        }
    }

    /// Block until the engine is `Stopped` or `deadline` passes.
    /// Returns whether it stopped.
    pub fn wait_stopped_until(&self, deadline: Instant) -> bool {
        let mut inner = self.inner.lock();
        while inner.state != EngineState::Stopped {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.state == EngineState::Stopped
    }

    fn leave(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 {
            self.changed.notify_all();
        }
    }
}

/// Marks one admitted request; dropping it (on any exit path) leaves.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownTrigger {
    Signal(String),
    Explicit,
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// `None` when the engine ran handlers inline.
    pub pool: Option<PoolShutdownReport>,
    /// Requests still inside `serve` at the deadline, whether running inline
    /// or waiting on a pooled job.
    pub abandoned_requests: usize,
    /// Idle contexts freed when the context pool was drained.
    pub contexts_released: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// `true` when every job and request finished before the deadline.
    pub fn is_clean(&self) -> bool {
        self.abandoned_requests == 0 && self.pool.as_ref().map_or(true, |p| p.is_clean())
    }
}

/// Runs the shutdown sequence exactly once.
pub struct ShutdownCoordinator {
    lifecycle: Arc<Lifecycle>,
    workers: Option<Arc<WorkerPool>>,
    contexts: Arc<ContextPool>,
    transports: Mutex<Vec<Arc<dyn Transport>>>,
    sequence_started: AtomicBool,
    report: Mutex<Option<ShutdownReport>>,
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.lifecycle.state())
            .field("transports", &self.transports.lock().len())
            .finish_non_exhaustive()
    }
}

impl ShutdownCoordinator {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        workers: Option<Arc<WorkerPool>>,
        contexts: Arc<ContextPool>,
    ) -> Self {
        Self {
            lifecycle,
            workers,
            contexts,
            transports: Mutex::new(Vec::new()),
            sequence_started: AtomicBool::new(false),
            report: Mutex::new(None),
        }
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.transports.lock().push(transport);
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    /// Shut down with an overall budget of `timeout`.
    ///
    /// Only the first caller runs the sequence. Later and concurrent callers
    /// block until it completes and receive the same report.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shutdown_with(ShutdownTrigger::Explicit, timeout)
    }

    pub fn shutdown_with(&self, trigger: ShutdownTrigger, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + timeout;

        if self.sequence_started.swap(true, Ordering::SeqCst) {
            if self.lifecycle.wait_stopped_until(deadline) {
                if let Some(report) = self.report() {
                    return report;
                }
            }
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown already in progress and not finished within timeout"
            );
            return ShutdownReport {
                trigger,
                pool: None,
                abandoned_requests: self.lifecycle.in_flight(),
                contexts_released: 0,
                elapsed: started.elapsed(),
            };
        }

        // Draining may already have begun elsewhere; the sequence still runs.
        self.lifecycle.begin_drain();
        info!(
            trigger = ?trigger,
            timeout_ms = timeout.as_millis() as u64,
            in_flight = self.lifecycle.in_flight(),
            "Shutdown started, draining"
        );

        let transports: Vec<Arc<dyn Transport>> = self.transports.lock().clone();
        for transport in &transports {
            info!(transport = %transport.name(), "Transport stopped accepting");
            transport.stop_accepting();
        }

        let pool = self
            .workers
            .as_ref()
            .map(|workers| workers.shutdown(deadline.saturating_duration_since(Instant::now())));

        let abandoned_requests = self.lifecycle.wait_idle(deadline);
        if abandoned_requests > 0 {
            warn!(
                abandoned = abandoned_requests,
                "Shutdown deadline reached with requests still in flight"
            );
        }

        let contexts_released = self.contexts.drain();

        let report = ShutdownReport {
            trigger,
            pool,
            abandoned_requests,
            contexts_released,
            elapsed: started.elapsed(),
        };
        *self.report.lock() = Some(report.clone());
        self.lifecycle.mark_stopped();

        if report.is_clean() {
            info!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                contexts_released = report.contexts_released,
                "Shutdown complete"
            );
        } else {
            warn!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                abandoned_requests = report.abandoned_requests,
                abandoned_jobs = report.pool.as_ref().map_or(0, |p| p.abandoned.len()),
                "Shutdown complete with abandoned work"
            );
        }

        for transport in &transports {
            transport.on_stopped(&report);
        }
        report
    }

    /// The report of a finished shutdown.
    pub fn report(&self) -> Option<ShutdownReport> {
        self.report.lock().clone()
    }

    /// Block until some other caller has finished shutting down.
    pub fn wait_for_shutdown(&self) -> Option<ShutdownReport> {
        self.lifecycle.wait_stopped();
        self.report()
    }

    /// Start a thread that shuts down on the first SIGINT or SIGTERM.
    #[cfg(unix)]
    pub fn install_signal_handler(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> anyhow::Result<std::thread::JoinHandle<()>> {
        use anyhow::Context as _;
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
        let coordinator = Arc::clone(self);
        std::thread::Builder::new()
            .name("neurite-signals".into())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    let name = match signal {
                        SIGINT => "SIGINT",
                        SIGTERM => "SIGTERM",
                        _ => "signal",
                    };
                    info!(signal = name, "Received termination signal");
                    coordinator.shutdown_with(ShutdownTrigger::Signal(name.to_string()), timeout);
                }
            })
            .context("failed to spawn signal thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_refuses_after_drain() {
        let lifecycle = Lifecycle::new();
        let guard = lifecycle.enter();
        assert!(guard.is_some());
        assert_eq!(lifecycle.in_flight(), 1);
        assert!(lifecycle.begin_drain());
        assert!(!lifecycle.begin_drain());
        assert!(lifecycle.enter().is_none());
        drop(guard);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn test_wait_idle_times_out_with_count() {
        let lifecycle = Lifecycle::new();
        let _a = lifecycle.enter();
        let _b = lifecycle.enter();
        let left = lifecycle.wait_idle(Instant::now() + Duration::from_millis(10));
        assert_eq!(left, 2);
    }

    #[test]
    fn test_wait_idle_wakes_when_last_request_leaves() {
        let lifecycle = Arc::new(Lifecycle::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let lifecycle = Arc::clone(&lifecycle);
            std::thread::spawn(move || {
                let _guard = lifecycle.enter();
                tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(20));
            })
        };
        rx.recv().unwrap();
        let left = lifecycle.wait_idle(Instant::now() + Duration::from_secs(5));
        assert_eq!(left, 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_second_shutdown_returns_first_report() {
        let coordinator = ShutdownCoordinator::new(
            Arc::new(Lifecycle::new()),
            None,
            Arc::new(ContextPool::new(4)),
        );
        let first = coordinator.shutdown(Duration::from_millis(100));
        assert_eq!(coordinator.state(), EngineState::Stopped);
        assert!(first.is_clean());

        let second = coordinator.shutdown_with(
            ShutdownTrigger::Signal("SIGTERM".into()),
            Duration::from_millis(100),
        );
        assert_eq!(second.trigger, ShutdownTrigger::Explicit);
    }

    #[test]
    fn test_shutdown_completes_when_draining_began_elsewhere() {
        let lifecycle = Arc::new(Lifecycle::new());
        let coordinator =
            ShutdownCoordinator::new(Arc::clone(&lifecycle), None, Arc::new(ContextPool::new(4)));
        assert!(lifecycle.begin_drain());

        let began = Instant::now();
        let report = coordinator.shutdown(Duration::from_millis(100));
        assert!(began.elapsed() < Duration::from_secs(2));
        assert!(report.is_clean());
        assert_eq!(coordinator.state(), EngineState::Stopped);
        assert_eq!(coordinator.report().map(|r| r.elapsed), Some(report.elapsed));
    }

    #[test]
    fn test_waiting_caller_gives_up_at_its_deadline() {
        let lifecycle = Arc::new(Lifecycle::new());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            Arc::clone(&lifecycle),
            None,
            Arc::new(ContextPool::new(4)),
        ));
        let guard = lifecycle.enter();

        let first = {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || coordinator.shutdown(Duration::from_millis(300)))
        };
        while lifecycle.state() == EngineState::Running {
            std::thread::sleep(Duration::from_millis(1));
        }

        let began = Instant::now();
        let second = coordinator.shutdown(Duration::from_millis(20));
        assert!(began.elapsed() < Duration::from_millis(250));
        assert_eq!(second.abandoned_requests, 1);
        assert!(!second.is_clean());

        drop(guard);
        let first = first.join().unwrap();
        assert!(first.is_clean());
        assert_eq!(coordinator.state(), EngineState::Stopped);
    }

    #[test]
    fn test_wait_stopped_until_times_out() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.wait_stopped_until(Instant::now() + Duration::from_millis(10)));
    }
}
