use dashmap::DashMap;
use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;
use crate::error::{codes, ErrorBody};

const DEFAULT_MAX_KEYS: usize = 100_000;

type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

/// Per-key token bucket limiter.
///
/// Each key starts with `burst` tokens and refills at `per_second`. A request
/// takes one token; when the bucket is empty the chain short-circuits with
/// 429 `RATE_LIMIT_EXCEEDED` and a `Retry-After` hint.
///
/// Buckets live in a `DashMap`, so keys only contend with themselves.
///
/// Keys usually come from client-supplied headers. Once `max_keys` buckets
/// are tracked, admitting a new key first drops buckets that have refilled
/// to `burst`, which behave exactly like a fresh bucket. With a zero refill
/// rate nothing refills, so call [`RateLimit::prune`] periodically instead.
pub struct RateLimit {
    per_second: f64,
    burst: f64,
    max_keys: usize,
    key_fn: KeyFn,
    buckets: DashMap<String, Bucket>,
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .field("keys", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl RateLimit {
    /// Keyed by the first `x-forwarded-for` address, or one shared bucket.
    pub fn new(per_second: f64, burst: u32) -> Self {
        Self {
            per_second: per_second.max(0.0),
            burst: f64::from(burst.max(1)),
            max_keys: DEFAULT_MAX_KEYS,
            key_fn: Arc::new(default_key),
            buckets: DashMap::new(),
        }
    }

    /// Bucket count above which refilled buckets are evicted.
    #[must_use]
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    #[must_use]
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(f);
        self
    }

    /// Take one token for `key` at `now`.
    ///
    /// `Err` carries the wait until the next token is available.
    pub fn check(&self, key: &str, now: Instant) -> Result<(), Duration> {
        // Evict before taking an entry guard; `retain` locks every shard.
        if self.buckets.len() >= self.max_keys && !self.buckets.contains_key(key) {
            self.evict_refilled(now);
        }

        let mut bucket = match self.buckets.get_mut(key) {
            Some(b) => b,
            None => self.buckets.entry(key.to_string()).or_insert(Bucket {
                tokens: self.burst,
                refreshed: now,
            }),
        };

        let elapsed = now.saturating_duration_since(bucket.refreshed).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
        bucket.refreshed = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if self.per_second > 0.0 {
            let wait = (1.0 - bucket.tokens) / self.per_second;
            Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        } else {
            Err(Duration::MAX)
        }
    }

    /// Drop buckets idle for longer than `idle` as of `now`.
    pub fn prune(&self, idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.refreshed) < idle);
        before - self.buckets.len()
    }

    fn evict_refilled(&self, now: Instant) {
        if self.per_second <= 0.0 {
            return;
        }
        let (per_second, burst) = (self.per_second, self.burst);
        let before = self.buckets.len();
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.refreshed).as_secs_f64();
            b.tokens + elapsed * per_second < burst
        });
        debug!(
            evicted = before - self.buckets.len(),
            remaining = self.buckets.len(),
            "Rate limiter evicted refilled buckets"
        );
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

fn default_key(ctx: &Context) -> String {
    ctx.header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "global".to_string())
}

impl Middleware for RateLimit {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        let key = (self.key_fn)(ctx);
        match self.check(&key, Instant::now()) {
            Ok(()) => next.run(ctx),
            Err(wait) => {
                let secs = wait.as_secs_f64().ceil().clamp(1.0, 3600.0);
                ctx.set_header("retry-after", &format!("{secs:.0}"))?;
                ctx.json(
                    StatusCode::TOO_MANY_REQUESTS,
                    &ErrorBody::new(codes::RATE_LIMIT_EXCEEDED, "Too many requests"),
                )
            }
        }
    }

    fn name(&self) -> &'static str {
        "rate_limit"
    }
}
