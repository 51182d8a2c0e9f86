//! # Neurite
//!
//! **Neurite** is a request dispatch engine: the part of a web framework that
//! sits between a transport that has parsed a request and the application
//! handler that answers it.
//!
//! ## Overview
//!
//! For every request the engine resolves a route in a segment trie, borrows a
//! recycled [`Context`] from a pool, runs the route's composed middleware
//! chain around its handler (inline or on a bounded worker pool), converts
//! errors and panics into responses, and returns the context to the pool.
//! A shutdown coordinator drains in-flight work within a deadline and reports
//! whatever had to be abandoned.
//!
//! No sockets are opened here. A transport calls [`RunningEngine::serve`]
//! with a [`server::Request`] and writes back the [`server::Response`]; the
//! [`server::Transport`] trait lets it take part in graceful shutdown.
//!
//! ## Architecture
//!
//! - **[`router`]** - Segment trie with static > param > wildcard precedence
//!   and backtracking; route groups
//! - **[`context`]** - Per-request [`Context`], the context pool and
//!   cancellation tokens
//! - **[`middleware`]** - Onion-model [`Middleware`] chains and the built-in
//!   middleware
//! - **[`worker_pool`]** - Fixed worker threads over a bounded queue with
//!   reject or bounded-block backpressure
//! - **[`dispatcher`]** - Resolve, execute, recover, respond
//! - **[`shutdown`]** - Lifecycle state machine, drain and the
//!   [`ShutdownReport`]
//! - **[`engine`]** - Build-then-serve facade over all of the above
//! - **[`runtime_config`]** - YAML and `NEURITE_*` environment configuration
//! - **[`logging`]** - `tracing-subscriber` setup
//! - **[`loadtest`]** / **[`cli`]** - In-process load generator behind the
//!   `neurite-loadgen` binary
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant T as Transport
//!     participant D as Dispatcher
//!     participant R as RouteTable
//!     participant P as ContextPool
//!     participant W as WorkerPool
//!     participant C as Chain
//!
//!     T->>D: serve(Request)
//!     D->>D: lifecycle.enter() (503 when draining)
//!     D->>P: acquire
//!     D->>R: resolve_into(method, path, params)
//!     alt no route
//!         D-->>T: 404
//!     else matched
//!         opt pooled mode
//!             D->>W: submit(job) (429 when full)
//!         end
//!         D->>C: run(ctx) under catch_unwind
//!         C-->>D: Ok / HttpError / error / panic
//!         D->>P: release
//!         D-->>T: Response
//!     end
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use http::StatusCode;
//! use neurite::{Context, Engine, EngineConfig, HandlerResult};
//! use neurite::server::Request;
//! use std::time::Duration;
//!
//! let mut engine = Engine::new(EngineConfig::from_env()?)?;
//! engine.router().get("/users/:id", |ctx: &mut Context| -> HandlerResult {
//!     let id = ctx.param("id").unwrap_or_default().to_string();
//!     ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//! })?;
//!
//! let running = engine.start();
//! let response = running.serve(Request::get("/users/42"));
//! assert_eq!(response.status(), StatusCode::OK);
//!
//! let report = running.shutdown(Duration::from_secs(5));
//! assert!(report.is_clean());
//! ```
//!
//! ## Error Mapping
//!
//! | Outcome                              | Status |
//! |--------------------------------------|--------|
//! | handler returned `Ok`                | whatever the handler wrote (200 by default) |
//! | handler returned [`error::HttpError`] | its status, JSON [`error::ErrorBody`] |
//! | handler returned any other error     | 500 |
//! | handler panicked                     | 500, logged with a backtrace |
//! | no matching route                    | 404 |
//! | worker queue full                    | 429 |
//! | engine draining or stopped           | 503 |
//! | request deadline passed              | 504 |

pub mod cli;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ids;
pub mod loadtest;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod shutdown;
pub mod worker_pool;

pub use context::{CancelToken, Context, ContextPool};
pub use dispatcher::{Dispatcher, ExecutionMode};
pub use engine::{Engine, EngineStats, RunningEngine};
pub use error::{ConfigError, HttpError, PoolError, RouteError};
pub use ids::{JobId, RequestId};
pub use middleware::{Handler, HandlerResult, Middleware, Next};
pub use router::{RouteTable, RouteTableBuilder};
pub use runtime_config::EngineConfig;
pub use shutdown::{EngineState, ShutdownReport};
pub use worker_pool::{BackpressureMode, WorkerPool, WorkerPoolConfig};
