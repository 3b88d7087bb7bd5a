//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use srpc_config::Config;

use crate::Endpoint;
use crate::bootstrap::BootstrapError;
use crate::errors::RpcError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once the engine is up and the service is offered.
    fn bootstrap_succeeded(&self, config: &Config, local: Endpoint);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when a worker stops because of an engine error.
    fn worker_failed(&self, worker: usize, error: &RpcError);

    /// Invoked when the daemon begins shutting down.
    fn shutdown_started(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config, local: Endpoint) {
        (**self).bootstrap_succeeded(config, local);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn worker_failed(&self, worker: usize, error: &RpcError) {
        (**self).worker_failed(worker, error);
    }

    fn shutdown_started(&self) {
        (**self).shutdown_started();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config, local: Endpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            local = %local,
            service = %config.service_name(),
            workers = config.workers(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn worker_failed(&self, worker: usize, error: &RpcError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "worker_failed",
            worker,
            category = %error.category(),
            error = %error,
            "worker stopped"
        );
    }

    fn shutdown_started(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            "daemon shutting down"
        );
    }
}
