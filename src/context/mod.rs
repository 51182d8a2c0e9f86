//! # Context Module
//!
//! Per-request state and its pool.
//!
//! A [`Context`] carries the request, the response being built, the path
//! parameters captured by the route table, a typed key/value store scoped to
//! one request, and the request's [`CancelToken`]. Contexts are recycled
//! through a [`ContextPool`]; the dispatcher holds each one in a
//! [`PooledContext`] guard so it is returned on every exit path, panics
//! included.

mod cancel;
mod core;
mod pool;

pub use cancel::{CancelReason, CancelToken};
pub use core::Context;
pub use pool::{ContextPool, ContextPoolStats, PooledContext};
