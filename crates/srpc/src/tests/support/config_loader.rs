//! Configuration helpers and loaders for success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use srpc_config::Config;

use crate::bootstrap::ConfigLoader;

/// Loopback configuration with short budgets so failing paths finish quickly.
#[must_use]
pub fn fast_config() -> Config {
    Config {
        bind_host: "127.0.0.1".to_owned(),
        port: 0,
        connect_attempts: 3,
        connect_timeout_ms: 100,
        call_attempts: 3,
        call_timeout_ms: 100,
        queue_capacity: 8,
        poll_interval_ms: 10,
        workers: 1,
        ..Config::default()
    }
}

/// Loader yielding [`fast_config`].
#[derive(Debug, Default)]
pub struct TestConfigLoader;

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(fast_config())
    }
}

/// Loader that intentionally fails by passing an unparsable CLI argument.
#[derive(Debug, Default)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("srpcd"),
            OsString::from("--connect-attempts"),
            OsString::from("many"),
        ];
        Config::load_from_iter(args)
    }
}

/// Loader whose configuration loads but does not validate.
#[derive(Debug, Default)]
pub struct InvalidConfigLoader;

impl ConfigLoader for InvalidConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            workers: 0,
            ..fast_config()
        })
    }
}
