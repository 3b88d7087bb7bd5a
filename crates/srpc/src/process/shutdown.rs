//! Shutdown triggers for the daemon.

use std::fmt;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Signals that stop the daemon.
const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Blocks the daemon's main thread until it should stop serving.
pub trait ShutdownSignal: Send + Sync {
    /// Waits for a shutdown request and reports what triggered it.
    ///
    /// # Errors
    ///
    /// Fails when the trigger cannot be observed at all.
    fn wait(&self) -> Result<ShutdownCause, ShutdownError>;
}

/// What ended the serving phase of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A termination signal was delivered.
    Signal(i32),
    /// The trigger went away without an explicit request.
    Closed,
    /// An embedding caller asked the daemon to stop.
    Requested,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Closed => f.write_str("signal stream closed"),
            Self::Requested => f.write_str("requested"),
        }
    }
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<ShutdownCause, ShutdownError> {
        let mut signals = Signals::new(TERMINATION_SIGNALS)
            .map_err(|source| ShutdownError::Install { source })?;
        let cause = signals
            .forever()
            .next()
            .map_or(ShutdownCause::Closed, ShutdownCause::Signal);
        info!(target: PROCESS_TARGET, cause = %cause, "shutdown requested");
        Ok(cause)
    }
}
