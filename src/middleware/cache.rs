use dashmap::DashMap;
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Key/value store collaborator used by [`ResponseCache`].
///
/// Lookup misses and store failures are not errors for the request; the
/// middleware just runs the handler.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResponse>;
    fn set(&self, key: &str, value: CachedResponse, ttl: Duration);
}

/// Caches successful `GET` responses.
///
/// The key is `prefix + path`, plus `?query` when the request has one. A hit
/// short-circuits with 200 and the stored body; a miss runs the chain and
/// stores the body if the final status is exactly 200. Other methods pass
/// straight through.
pub struct ResponseCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    key_prefix: String,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            key_prefix: String::new(),
        }
    }

    #[must_use]
    pub fn key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn key_for(&self, ctx: &Context) -> String {
        let mut key = format!("{}{}", self.key_prefix, ctx.path());
        let query = ctx.request().query();
        if !query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter().map(|(k, v)| (k.as_ref(), v.as_str())))
                .finish();
            key.push('?');
            key.push_str(&encoded);
        }
        key
    }
}

impl Middleware for ResponseCache {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        if ctx.method() != Method::GET {
            return next.run(ctx);
        }

        let key = self.key_for(ctx);
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "Response cache hit");
            ctx.set_header("x-cache", "HIT")?;
            return ctx.blob(StatusCode::OK, &hit.content_type, &hit.body);
        }

        next.run(ctx)?;

        if ctx.response().status() == StatusCode::OK {
            let content_type = ctx
                .response()
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            self.cache.set(
                &key,
                CachedResponse {
                    content_type,
                    body: ctx.response().body().to_vec(),
                },
                self.ttl,
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "response_cache"
    }
}

/// In-process [`Cache`] with per-entry expiry and a soft entry cap.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (CachedResponse, Option<Instant>)>,
    max_entries: usize,
}

impl MemoryCache {
    /// `max_entries == 0` means unbounded.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, (_, expires)| expires.map_or(true, |e| e > now));
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let entry = self.entries.get(key)?;
        let (value, expires) = entry.value();
        if expires.is_some_and(|e| e <= Instant::now()) {
            return None;
        }
        Some(value.clone())
    }

    fn set(&self, key: &str, value: CachedResponse, ttl: Duration) {
        if self.max_entries > 0 && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                return;
            }
        }
        let expires = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, expires));
    }
}
