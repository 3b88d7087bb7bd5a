//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use srpc_config::Config;

use crate::Endpoint;
use crate::bootstrap::BootstrapError;
use crate::errors::RpcError;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed with the engine reachable at the endpoint.
    BootstrapSucceeded(Endpoint),
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// A worker stopped with an error description.
    WorkerFailed(usize, String),
    /// Shutdown began.
    ShutdownStarted,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Endpoint reported by the last successful bootstrap.
    #[must_use]
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.events().into_iter().find_map(|event| match event {
            HealthEvent::BootstrapSucceeded(local) => Some(local),
            _ => None,
        })
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config, local: Endpoint) {
        self.record(HealthEvent::BootstrapSucceeded(local));
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn worker_failed(&self, worker: usize, error: &RpcError) {
        self.record(HealthEvent::WorkerFailed(worker, error.to_string()));
    }

    fn shutdown_started(&self) {
        self.record(HealthEvent::ShutdownStarted);
    }
}
