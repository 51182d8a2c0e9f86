//! In-process load generator.
//!
//! Drives `concurrency` caller threads against [`RunningEngine::serve`] until
//! a request count or a duration is reached, whichever comes first, and
//! summarizes the outcome. No sockets are involved, so the numbers measure
//! the dispatch engine alone.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use crate::engine::RunningEngine;
use crate::server::Request;

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub concurrency: usize,
    /// Stop after this many requests in total.
    pub requests: Option<u64>,
    /// Stop after this much wall time.
    pub duration: Option<Duration>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            requests: Some(10_000),
            duration: None,
        }
    }
}

/// Aggregated results of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub requests: u64,
    /// Responses with a 4xx or 5xx status.
    pub errors: u64,
    pub elapsed: Duration,
    pub requests_per_sec: f64,
    pub min_latency: Duration,
    pub avg_latency: Duration,
    pub max_latency: Duration,
    /// Response count per status code.
    pub statuses: BTreeMap<u16, u64>,
}

#[derive(Debug, Default)]
struct CallerStats {
    requests: u64,
    errors: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    statuses: BTreeMap<u16, u64>,
}

impl CallerStats {
    fn record(&mut self, status: u16, latency: Duration) {
        self.requests += 1;
        if status >= 400 {
            self.errors += 1;
        }
        self.total += latency;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = self.max.max(latency);
        *self.statuses.entry(status).or_default() += 1;
    }

    fn merge(&mut self, other: CallerStats) {
        self.requests += other.requests;
        self.errors += other.errors;
        self.total += other.total;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = self.max.max(other.max);
        for (status, count) in other.statuses {
            *self.statuses.entry(status).or_default() += count;
        }
    }
}

/// Run the load. `make_request(n)` builds the n-th request.
///
/// With neither a request count nor a duration configured, the default
/// request count applies.
pub fn run<F>(engine: &RunningEngine, config: &LoadConfig, make_request: F) -> LoadReport
where
    F: Fn(u64) -> Request + Sync,
{
    let limit = match (config.requests, config.duration) {
        (None, None) => LoadConfig::default().requests,
        (requests, _) => requests,
    };
    let concurrency = config.concurrency.max(1);
    let next = &AtomicU64::new(0);
    let make_request = &make_request;
    let started = Instant::now();
    let stop_at = config.duration.map(|d| started + d);

    info!(
        concurrency = concurrency,
        requests = ?limit,
        duration_ms = ?config.duration.map(|d| d.as_millis() as u64),
        "Load run started"
    );

    let mut total = CallerStats::default();
    std::thread::scope(|scope| {
        let callers: Vec<_> = (0..concurrency)
            .map(|_| {
                scope.spawn(move || {
                    let mut stats = CallerStats::default();
                    loop {
                        if stop_at.is_some_and(|t| Instant::now() >= t) {
                            break;
                        }
                        let n = next.fetch_add(1, Ordering::Relaxed);
                        if limit.is_some_and(|l| n >= l) {
                            break;
                        }
                        let request = make_request(n);
                        let sent = Instant::now();
                        let response = engine.serve(request);
                        stats.record(response.status().as_u16(), sent.elapsed());
                    }
                    stats
                })
            })
            .collect();
        for caller in callers {
            // A panicking caller loses only its own samples.
            if let Ok(stats) = caller.join() {
                total.merge(stats);
            }
        }
    });

    let elapsed = started.elapsed();
    let report = LoadReport {
        requests: total.requests,
        errors: total.errors,
        elapsed,
        requests_per_sec: if elapsed.is_zero() {
            0.0
        } else {
            total.requests as f64 / elapsed.as_secs_f64()
        },
        min_latency: total.min.unwrap_or_default(),
        avg_latency: if total.requests == 0 {
            Duration::ZERO
        } else {
            total.total / u32::try_from(total.requests).unwrap_or(u32::MAX)
        },
        max_latency: total.max,
        statuses: total.statuses,
    };

    info!(
        requests = report.requests,
        errors = report.errors,
        rps = report.requests_per_sec as u64,
        avg_us = report.avg_latency.as_micros() as u64,
        "Load run finished"
    );
    report
}
