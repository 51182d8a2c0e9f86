//! # Server Boundary
//!
//! Types exchanged with the transport collaborator. The engine does not parse
//! HTTP/1.1 or HTTP/2 frames and does not terminate TLS; a transport hands it a
//! [`Request`], calls [`Dispatcher::serve`](crate::dispatcher::Dispatcher::serve)
//! and writes the returned [`Response`] to the wire.
//!
//! During shutdown the [`ShutdownCoordinator`](crate::shutdown::ShutdownCoordinator)
//! tells every registered [`Transport`] to stop accepting connections before the
//! worker pool drains, and reports the final outcome once the engine is stopped.

pub mod request;
pub mod response;

pub use request::{parse_query_params, Request};
pub use response::Response;

use crate::shutdown::ShutdownReport;

/// A transport that feeds requests into the engine.
pub trait Transport: Send + Sync {
    /// Name used in shutdown logs.
    fn name(&self) -> &str;

    /// Stop accepting new connections. Connections already accepted may keep
    /// delivering the requests they have in flight.
    fn stop_accepting(&self);

    /// The engine reached `Stopped`.
    fn on_stopped(&self, _report: &ShutdownReport) {}
}
