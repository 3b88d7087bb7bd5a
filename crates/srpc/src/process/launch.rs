//! Supervises daemon launch sequencing and shutdown.

use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::workers::EchoWorkers;
use super::PROCESS_TARGET;

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) shutdown: S,
}

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// Fails when bootstrap fails, workers cannot be spawned or signal handlers
/// cannot be installed, and when workers panic or outlive the configured
/// shutdown budget.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown: SystemShutdownSignal,
    })
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        shutdown,
    } = plan;
    let daemon = bootstrap_with(&loader, Arc::clone(&reporter))?;
    let engine = daemon.engine();
    let service = daemon.service();
    let workers = EchoWorkers::spawn(&engine, service, daemon.config().workers(), &reporter)
        .map_err(|source| LaunchError::Workers { source })?;
    info!(
        target: PROCESS_TARGET,
        service = %daemon.config().service_name(),
        workers = workers.len(),
        "daemon ready"
    );

    let waited = shutdown.wait();
    reporter.shutdown_started();
    engine
        .withdraw(service)
        .map_err(|source| LaunchError::Withdraw { source })?;
    let budget = daemon.config().shutdown_timeout();
    let exit = workers.join_within(budget);
    let cause = waited?;
    if exit.panicked > 0 {
        return Err(LaunchError::WorkerPanicked {
            count: exit.panicked,
        });
    }
    if exit.lingering > 0 {
        return Err(LaunchError::ShutdownTimedOut {
            lingering: exit.lingering,
            budget,
        });
    }
    info!(
        target: PROCESS_TARGET,
        cause = %cause,
        "shutdown sequence completed"
    );
    Ok(())
}
