//! # Engine Facade
//!
//! Wires the pieces together in two phases:
//!
//! ```rust,ignore
//! use neurite::{Engine, EngineConfig};
//! use neurite::server::Request;
//!
//! let mut engine = Engine::new(EngineConfig::from_env()?)?;
//! engine.router().get("/health", |ctx: &mut Context| -> HandlerResult {
//!     ctx.text(StatusCode::OK, "ok")
//! })?;
//!
//! let running = engine.start();
//! let response = running.serve(Request::get("/health"));
//! let report = running.shutdown(Duration::from_secs(5));
//! ```
//!
//! [`Engine`] is the build phase: the route table is still mutable.
//! [`Engine::start`] seals it; the returned [`RunningEngine`] only serves and
//! shuts down, so routes cannot change while requests are in flight.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::{ContextPool, ContextPoolStats};
use crate::dispatcher::{Dispatcher, ExecutionMode};
use crate::error::PoolError;
use crate::router::RouteTableBuilder;
use crate::runtime_config::EngineConfig;
use crate::server::{Request, Response, Transport};
use crate::shutdown::{EngineState, Lifecycle, ShutdownCoordinator, ShutdownReport};
use crate::worker_pool::{PoolStats, WorkerPool};

/// Build phase of the engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    routes: RouteTableBuilder,
    contexts: Arc<ContextPool>,
    workers: Option<Arc<WorkerPool>>,
}

impl Engine {
    /// Create the pools. In pooled mode the worker threads start here, so a
    /// spawn failure surfaces before any route is registered.
    pub fn new(config: EngineConfig) -> Result<Self, PoolError> {
        let workers = match config.execution {
            ExecutionMode::Inline => None,
            ExecutionMode::Pooled => Some(Arc::new(WorkerPool::new(config.worker_pool_config())?)),
        };
        Ok(Self {
            contexts: Arc::new(ContextPool::new(config.context_pool_max_idle)),
            routes: RouteTableBuilder::new(),
            workers,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Route registration, global middleware and groups.
    pub fn router(&mut self) -> &mut RouteTableBuilder {
        &mut self.routes
    }

    /// Seal the route table and start serving.
    pub fn start(self) -> RunningEngine {
        let table = self.routes.build();
        let lifecycle = Arc::new(Lifecycle::new());

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&table),
            Arc::clone(&self.contexts),
            Arc::clone(&lifecycle),
        )
        .with_request_timeout(self.config.request_timeout());
        if let Some(workers) = &self.workers {
            dispatcher = dispatcher.with_worker_pool(Arc::clone(workers));
        }

        let coordinator = ShutdownCoordinator::new(lifecycle, self.workers, self.contexts);

        info!(
            routes = table.len(),
            execution = ?self.config.execution,
            workers = self.config.workers,
            request_timeout_ms = self.config.request_timeout_ms,
            "Engine started"
        );

        RunningEngine {
            dispatcher: Arc::new(dispatcher),
            coordinator: Arc::new(coordinator),
            config: Arc::new(self.config),
        }
    }
}

/// Point-in-time view of a running engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub in_flight: usize,
    pub routes: usize,
    pub contexts_created: u64,
    pub contexts_reused: u64,
    pub contexts_idle: usize,
    pub workers: Option<PoolStats>,
}

/// Serving phase of the engine. Cheap to clone; clones share everything.
#[derive(Debug, Clone)]
pub struct RunningEngine {
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<ShutdownCoordinator>,
    config: Arc<EngineConfig>,
}

impl RunningEngine {
    pub fn serve(&self, request: Request) -> Response {
        self.dispatcher.serve(request)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.coordinator.state()
    }

    /// Transports are told to stop accepting when shutdown starts.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.coordinator.register_transport(transport);
    }

    pub fn stats(&self) -> EngineStats {
        let ContextPoolStats {
            created,
            reused,
            idle,
        } = self.dispatcher.context_pool().stats();
        EngineStats {
            state: self.state(),
            in_flight: self.dispatcher.lifecycle().in_flight(),
            routes: self.dispatcher.table().len(),
            contexts_created: created,
            contexts_reused: reused,
            contexts_idle: idle,
            workers: self.dispatcher.worker_pool().map(|w| w.stats()),
        }
    }

    /// Drain and stop within `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.coordinator.shutdown(timeout)
    }

    /// Drain and stop within the configured shutdown timeout.
    pub fn shutdown_default(&self) -> ShutdownReport {
        self.coordinator.shutdown(self.config.shutdown_timeout())
    }

    /// Shut down on SIGINT/SIGTERM using the configured timeout.
    #[cfg(unix)]
    pub fn install_signal_handler(&self) -> anyhow::Result<std::thread::JoinHandle<()>> {
        self.coordinator
            .install_signal_handler(self.config.shutdown_timeout())
    }

    /// Block until a shutdown started elsewhere has finished.
    pub fn wait_for_shutdown(&self) -> Option<ShutdownReport> {
        self.coordinator.wait_for_shutdown()
    }
}
