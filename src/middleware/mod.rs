//! # Middleware Module
//!
//! Wrapping behaviors composed around a route handler in the "onion" model:
//! the first registered middleware is the outermost layer, observing the
//! request first and the response last.
//!
//! A [`Middleware`] receives the context and a [`Next`] for the rest of the
//! chain and decides whether to call it. Each route's chain is composed once
//! when the route table is built (global, then group, then per-route) and
//! stored as a [`Chain`], so the per-request cost does not depend on how the
//! list was assembled.
//!
//! ## Built-in middleware
//!
//! - [`AccessLog`]: request/response logging with a slow-request threshold
//! - [`Auth`]: header or query token validation with claims in the context
//! - [`Cors`]: preflight handling and allow-origin headers
//! - [`Metrics`]: request totals and per-route latency
//! - [`RateLimit`]: per-key token bucket
//! - [`RequestSpan`]: a `tracing` span per request
//! - [`ResponseCache`]: caches `GET` 200 responses in a [`Cache`]
//! - [`SecurityHeaders`]: HSTS, framing, sniffing and CSP headers
//!
//! Panics are not caught here; the dispatcher is the single recovery point.

mod auth;
mod cache;
mod core;
mod cors;
mod logging;
mod metrics;
mod rate_limit;
mod security_headers;
mod tracing;

pub use auth::Auth;
pub use cache::{Cache, CachedResponse, MemoryCache, ResponseCache};
pub use core::{from_fn, Chain, FnMiddleware, Handler, HandlerResult, Middleware, Next};
pub(crate) use core::cancellation_error;
pub use cors::{Cors, CorsBuilder, CorsConfigError, OriginValidation};
pub use logging::AccessLog;
pub use metrics::{Metrics, RouteStats};
pub use rate_limit::RateLimit;
pub use security_headers::SecurityHeaders;
pub use tracing::RequestSpan;
