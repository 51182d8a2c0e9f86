//! # Dispatcher Module
//!
//! The dispatcher is the request path of the engine. For each request it:
//!
//! 1. checks that the engine is still `Running` (otherwise 503),
//! 2. acquires a pooled [`Context`](crate::context::Context),
//! 3. resolves the route, answering 404 when nothing matches,
//! 4. runs the route's precomputed middleware chain, inline or on the
//!    [`WorkerPool`](crate::worker_pool::WorkerPool),
//! 5. maps handler errors and recovered panics to responses,
//! 6. releases the context on every exit path.
//!
//! ## Error mapping
//!
//! | Outcome                          | Status | Code                    |
//! |----------------------------------|--------|-------------------------|
//! | no route / method mismatch       | 404    | `NOT_FOUND`             |
//! | handler returned `HttpError`     | its own| its own                 |
//! | handler returned any other error | 500    | `INTERNAL_SERVER_ERROR` |
//! | handler or middleware panicked   | 500    | `INTERNAL_SERVER_ERROR` |
//! | worker queue full                | 429    | `TOO_MANY_REQUESTS`     |
//! | draining or pool closed          | 503    | `SERVICE_UNAVAILABLE`   |
//! | request deadline passed          | 504    | `REQUEST_TIMEOUT`       |
//!
//! Panics are caught once per request at this layer, logged with their
//! location and a backtrace, and then treated like any other handler error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use neurite::dispatcher::Dispatcher;
//! use neurite::server::Request;
//!
//! let dispatcher = Dispatcher::new(table, contexts, lifecycle);
//! let response = dispatcher.serve(Request::get("/users/42"));
//! ```

mod core;
mod recovery;

pub use core::{Dispatcher, ExecutionMode};
