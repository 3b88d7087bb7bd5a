//! Connection-oriented request/response calls over UDP.
//!
//! A process starts one [`Rpc`] engine bound to a UDP port. Clients open
//! connections to named services with [`Rpc::connect`] and issue one call at
//! a time with [`Rpc::call`]; the engine retransmits until the matching
//! response arrives or the retry budget runs out. Servers register names with
//! [`Rpc::offer`], and worker threads pull queries with [`Rpc::query`] and
//! answer them with [`Rpc::response`]. Duplicate queries never reach a worker
//! twice: the last response per connection is cached and replayed instead.
//!
//! A family of processes that share ports across `fork` can freeze the engine
//! with [`Rpc::suspend`] and move a child onto a port of its own with
//! [`SuspendGuard::reinit`].
//!
//! ```no_run
//! use srpc::Rpc;
//!
//! # fn main() -> Result<(), srpc::RpcError> {
//! let server = Rpc::init(9000)?;
//! let service = server.offer("db")?;
//!
//! let client = Rpc::init(0)?;
//! let connection = client.connect("127.0.0.1", 9000, "db", 1)?;
//! # std::thread::spawn(move || {
//! #     let mut buffer = [0_u8; 64];
//! #     if let Ok((endpoint, _)) = server.query(service, &mut buffer) {
//! #         let _ = server.response(service, &endpoint, b"pong", 4);
//! #     }
//! # });
//! let mut reply = [0_u8; 64];
//! let len = client.call(connection, b"ping", 4, &mut reply)?;
//! assert_eq!(&reply[..len], b"pong");
//! # Ok(())
//! # }
//! ```
//!
//! The `srpcd` binary wraps the engine in a small echo daemon configured
//! through [`srpc_config::Config`].

mod bootstrap;
mod endpoint;
mod engine;
mod errors;
mod health;
mod process;
mod table;
pub mod telemetry;
mod transport;
pub mod wire;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use endpoint::Endpoint;
pub use engine::{ConnectionHandle, Rpc, RpcEndpoint, ServiceHandle, SuspendGuard};
pub use errors::{
    CallFailure, DispatchFailure, ErrorCategory, HandshakeFailure, InitFailure, RpcError,
    UsageViolation,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    EchoWorkers, LaunchError, ShutdownCause, ShutdownError, ShutdownSignal, SystemShutdownSignal,
    WorkerExit, run_daemon,
};
pub use table::{ConnectionId, ConnectionInfo, ConnectionState, Role};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::TransportError;

#[cfg(test)]
mod tests;
