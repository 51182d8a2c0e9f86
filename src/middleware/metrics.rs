use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

#[derive(Debug, Default)]
struct RouteCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

/// Point-in-time view of one route's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStats {
    pub route: String,
    pub requests: u64,
    pub errors: u64,
    pub average_latency: Duration,
    pub max_latency: Duration,
}

/// Request counters and latency, in total and per route.
///
/// Totals are plain atomics; per-route counters live in a `DashMap` keyed by
/// `"METHOD pattern"` so concurrent requests on different routes do not
/// contend on one lock. A request counts as an error when the chain returns
/// `Err` or the response status is 5xx.
///
/// Share it with `Arc` so the owner can read the numbers after registering
/// it: `builder.use_shared(Arc::clone(&metrics))`.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
    routes: DashMap<String, RouteCounters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of requests processed
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Calculate the average request latency
    ///
    /// Returns zero duration if no requests have been processed yet.
    pub fn average_latency(&self) -> Duration {
        let count = self.requests.load(Ordering::Relaxed);
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Stats for one route, e.g. `route_stats("GET /users/:id")`.
    pub fn route_stats(&self, key: &str) -> Option<RouteStats> {
        self.routes.get(key).map(|c| snapshot(key, &c))
    }

    /// Stats for every route seen so far, sorted by key.
    pub fn all_route_stats(&self) -> Vec<RouteStats> {
        let mut all: Vec<RouteStats> = self
            .routes
            .iter()
            .map(|entry| snapshot(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.route.cmp(&b.route));
        all
    }

    fn record(&self, key: &str, latency: Duration, failed: bool) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        // Fast path: existing key without allocating.
        if let Some(counters) = self.routes.get(key) {
            bump(&counters, nanos, failed);
            return;
        }
        let counters = self.routes.entry(key.to_string()).or_default();
        bump(&counters, nanos, failed);
    }
}

fn bump(c: &RouteCounters, nanos: u64, failed: bool) {
    c.requests.fetch_add(1, Ordering::Relaxed);
    c.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
    c.max_latency_ns.fetch_max(nanos, Ordering::Relaxed);
    if failed {
        c.errors.fetch_add(1, Ordering::Relaxed);
    }
}

fn snapshot(key: &str, c: &RouteCounters) -> RouteStats {
    let requests = c.requests.load(Ordering::Relaxed);
    let total = c.total_latency_ns.load(Ordering::Relaxed);
    RouteStats {
        route: key.to_string(),
        requests,
        errors: c.errors.load(Ordering::Relaxed),
        average_latency: Duration::from_nanos(if requests == 0 { 0 } else { total / requests }),
        max_latency: Duration::from_nanos(c.max_latency_ns.load(Ordering::Relaxed)),
    }
}

impl Middleware for Metrics {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        let start = Instant::now();
        let result = next.run(ctx);
        let failed = result.is_err() || ctx.response().status().is_server_error();
        let key = format!(
            "{} {}",
            ctx.method(),
            ctx.route_pattern().unwrap_or("<unmatched>")
        );
        self.record(&key, start.elapsed(), failed);
        result
    }

    fn name(&self) -> &'static str {
        "metrics"
    }
}
