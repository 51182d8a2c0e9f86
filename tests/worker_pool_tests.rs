#![allow(clippy::unwrap_used, clippy::expect_used)]

use neurite::worker_pool::{Job, JobState};
use neurite::{BackpressureMode, PoolError, WorkerPool, WorkerPoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn pool(workers: usize, queue: usize, mode: BackpressureMode, timeout_ms: u64) -> WorkerPool {
    WorkerPool::new(WorkerPoolConfig::new(workers, queue, mode, timeout_ms, 0x40000)).unwrap()
}

/// Tracks how many jobs run at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
    finished: AtomicUsize,
}

impl Gauge {
    fn job(self: &Arc<Self>, label: String, hold: Duration) -> Job {
        let gauge = Arc::clone(self);
        Job::new(label, move || {
            let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(hold);
            gauge.current.fetch_sub(1, Ordering::SeqCst);
            gauge.finished.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[test]
fn test_capacity_never_exceeded() {
    for extra in [1usize, 5, 40] {
        let workers = 3;
        let pool = pool(workers, 64, BackpressureMode::Block, 2_000);
        let gauge = Arc::new(Gauge::default());

        for i in 0..workers + extra {
            pool.submit(gauge.job(format!("job-{i}"), Duration::from_millis(5)))
                .unwrap();
        }
        let report = pool.shutdown(Duration::from_secs(10));

        assert!(report.is_clean(), "extra={extra}: {report:?}");
        assert_eq!(gauge.finished.load(Ordering::SeqCst), workers + extra);
        assert!(gauge.max.load(Ordering::SeqCst) <= workers);
        assert!(pool.metrics().get_peak_active() <= workers);
    }
}

#[test]
fn test_concurrent_submitters_account_for_every_job() {
    let pool = Arc::new(pool(2, 8, BackpressureMode::Reject, 0));
    let gauge = Arc::new(Gauge::default());
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(4));

    let submitters: Vec<_> = (0..4)
        .map(|t| {
            let (pool, gauge, accepted, rejected, start) = (
                Arc::clone(&pool),
                Arc::clone(&gauge),
                Arc::clone(&accepted),
                Arc::clone(&rejected),
                Arc::clone(&start),
            );
            std::thread::spawn(move || {
                start.wait();
                for i in 0..100 {
                    match pool.submit(gauge.job(format!("t{t}-{i}"), Duration::from_micros(200))) {
                        Ok(()) => accepted.fetch_add(1, Ordering::SeqCst),
                        Err(PoolError::QueueFull { capacity }) => {
                            assert_eq!(capacity, 8);
                            rejected.fetch_add(1, Ordering::SeqCst)
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                }
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap();
    }

    let report = pool.shutdown(Duration::from_secs(10));
    assert!(report.is_clean());

    let accepted = accepted.load(Ordering::SeqCst);
    let rejected = rejected.load(Ordering::SeqCst);
    assert_eq!(accepted + rejected, 400);
    assert_eq!(gauge.finished.load(Ordering::SeqCst), accepted);
    assert_eq!(pool.metrics().get_completed_count(), accepted as u64);
    assert_eq!(pool.metrics().get_rejected_count(), rejected as u64);
    assert!(gauge.max.load(Ordering::SeqCst) <= 2);
}

#[test]
fn test_block_mode_admits_once_space_frees() {
    let pool = pool(1, 1, BackpressureMode::Block, 1_000);
    let (started_tx, started_rx) = flume::bounded::<()>(1);
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    pool.submit(Job::new("blocker", move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    }))
    .unwrap();
    started_rx.recv().unwrap();
    pool.submit(Job::new("fills-queue", || {})).unwrap();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        release_tx.send(()).unwrap();
    });

    let waited = Instant::now();
    pool.submit(Job::new("waits-for-space", || {})).unwrap();
    assert!(waited.elapsed() >= Duration::from_millis(20));

    releaser.join().unwrap();
    let report = pool.shutdown(Duration::from_secs(2));
    assert!(report.is_clean());
    assert_eq!(pool.metrics().get_completed_count(), 3);
}

#[test]
fn test_shutdown_drains_queued_jobs() {
    let pool = pool(1, 16, BackpressureMode::Reject, 0);
    let gauge = Arc::new(Gauge::default());
    for i in 0..10 {
        pool.submit(gauge.job(format!("job-{i}"), Duration::from_millis(2)))
            .unwrap();
    }

    let report = pool.shutdown(Duration::from_secs(5));
    assert!(report.is_clean());
    assert_eq!(gauge.finished.load(Ordering::SeqCst), 10);
    assert_eq!(pool.stats().queued, 0);
    assert_eq!(pool.stats().active, 0);
}

#[test]
fn test_no_job_lost_at_deadline() {
    let pool = pool(2, 16, BackpressureMode::Reject, 0);
    let (release_tx, release_rx) = flume::unbounded::<()>();
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..6 {
        let (release_rx, started, finished) =
            (release_rx.clone(), Arc::clone(&started), Arc::clone(&finished));
        pool.submit(Job::new(format!("stuck-{i}"), move || {
            started.fetch_add(1, Ordering::SeqCst);
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            finished.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }
    while started.load(Ordering::SeqCst) < 2 {
        std::thread::sleep(Duration::from_millis(1));
    }

    let report = pool.shutdown(Duration::from_millis(50));
    let running = report
        .abandoned
        .iter()
        .filter(|j| j.state == JobState::Running)
        .count();
    let queued = report
        .abandoned
        .iter()
        .filter(|j| j.state == JobState::Queued)
        .count();
    assert_eq!(running, 2);
    assert_eq!(queued, 4);
    assert_eq!(report.completed_during_drain, 0);

    // Abandoned ids are unique and sorted.
    let ids: Vec<_> = report.abandoned.iter().map(|j| j.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(ids, sorted);

    // Queued jobs never start once abandoned.
    for _ in 0..6 {
        let _ = release_tx.send(());
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert!(finished.load(Ordering::SeqCst) <= 2);
}

#[test]
fn test_submit_fails_once_shutdown_started() {
    let pool = Arc::new(pool(1, 4, BackpressureMode::Reject, 0));
    let (release_tx, release_rx) = flume::bounded::<()>(1);
    let (started_tx, started_rx) = flume::bounded::<()>(1);
    pool.submit(Job::new("slow", move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
    }))
    .unwrap();
    started_rx.recv().unwrap();

    let shutting_down = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || pool.shutdown(Duration::from_secs(5)))
    };
    while !pool.is_closed() {
        std::thread::sleep(Duration::from_millis(1));
    }

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let err = pool
        .submit(Job::new("too-late", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap_err();
    assert!(matches!(err, PoolError::Closed));

    release_tx.send(()).unwrap();
    let report = shutting_down.join().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.completed_during_drain, 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
