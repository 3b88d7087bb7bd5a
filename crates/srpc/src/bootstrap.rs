//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use srpc_config::{Config, ConfigError};

use crate::engine::{Rpc, ServiceHandle};
use crate::errors::RpcError;
use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that always yields the configuration it was built with.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {source}")]
    Validation {
        /// The rejected setting.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The engine could not start or the service could not be offered.
    #[error("failed to start the engine: {source}")]
    Engine {
        /// Underlying engine error.
        #[source]
        source: RpcError,
    },
}

/// A started engine offering the configured service.
pub struct Daemon {
    config: Config,
    engine: Arc<Rpc>,
    service: ServiceHandle,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the running engine.
    #[must_use]
    pub fn engine(&self) -> Arc<Rpc> {
        Arc::clone(&self.engine)
    }

    /// Handle of the offered service.
    #[must_use]
    pub const fn service(&self) -> ServiceHandle {
        self.service
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Reporter lifecycle events are sent to.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// # Errors
///
/// Fails when the configuration cannot be loaded or validated, telemetry
/// cannot be installed, the socket cannot be bound or the service cannot be
/// offered. Every failure is also passed to the reporter.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    match start(loader) {
        Ok((config, engine, service, telemetry)) => {
            let local = engine
                .local_endpoint()
                .map_err(|source| fail(&reporter, BootstrapError::Engine { source }))?;
            reporter.bootstrap_succeeded(&config, local);
            Ok(Daemon {
                config,
                engine,
                service,
                telemetry,
                reporter,
            })
        }
        Err(error) => Err(fail(&reporter, error)),
    }
}

fn start(
    loader: &dyn ConfigLoader,
) -> Result<(Config, Arc<Rpc>, ServiceHandle, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::Validation { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    let engine =
        Arc::new(Rpc::with_config(&config).map_err(|source| BootstrapError::Engine { source })?);
    let service = engine
        .offer(config.service_name())
        .map_err(|source| BootstrapError::Engine { source })?;
    Ok((config, engine, service, telemetry))
}

fn fail(reporter: &Arc<dyn HealthReporter>, error: BootstrapError) -> BootstrapError {
    reporter.bootstrap_failed(&error);
    error
}
