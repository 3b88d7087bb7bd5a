//! Defines the unified error surface for daemon launch and supervision.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::errors::RpcError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed before the service was offered.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker threads: {source}")]
    Workers {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for a shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The service could not be withdrawn during shutdown.
    #[error("failed to withdraw the service: {source}")]
    Withdraw {
        /// Underlying engine error.
        #[source]
        source: RpcError,
    },
    /// Worker threads panicked.
    #[error("{count} worker threads panicked")]
    WorkerPanicked {
        /// Number of panicked workers.
        count: usize,
    },
    /// Workers were still serving when the shutdown budget ran out.
    #[error("{lingering} worker threads still running after {budget:?}")]
    ShutdownTimedOut {
        /// Workers left running.
        lingering: usize,
        /// Configured shutdown budget.
        budget: Duration,
    },
}
