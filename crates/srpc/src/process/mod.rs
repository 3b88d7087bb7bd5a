//! Runtime of the `srpcd` daemon: echo workers and signal-driven shutdown.

mod errors;
pub(crate) mod launch;
pub(crate) mod shutdown;
pub(crate) mod workers;

pub use errors::LaunchError;
pub use launch::run_daemon;
pub use shutdown::{ShutdownCause, ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use workers::{EchoWorkers, WorkerExit};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
