//! Shared configuration for the srpc engine and the `srpcd` daemon.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then an
//! optional configuration file (`--config-path` or `SRPC_CONFIG_PATH`), then
//! `SRPC_*` environment variables, then command-line flags. The engine reads
//! its retransmission budgets, queue bound and socket settings from here, and
//! the daemon adds the service it offers and its worker count.

mod defaults;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_BIND_HOST, DEFAULT_CALL_ATTEMPTS, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_ATTEMPTS,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SERVICE_NAME, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKERS,
    MAX_SERVICE_NAME_BYTES, default_bind_host, default_call_attempts, default_call_timeout_ms,
    default_connect_attempts, default_connect_timeout_ms, default_log_filter,
    default_log_filter_string, default_log_format, default_poll_interval_ms, default_port,
    default_queue_capacity, default_service_name, default_shutdown_timeout_ms, default_workers,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration for the engine and daemon.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "SRPC")]
pub struct Config {
    /// Local address the datagram socket binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// UDP port to bind; zero requests an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CONNECT transmissions before a handshake fails.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Wait per CONNECT transmission, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// QUERY transmissions before a call fails.
    #[serde(default = "default_call_attempts")]
    pub call_attempts: u32,
    /// Wait per QUERY transmission, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Pending queries held per service before datagrams are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Read timeout of the receiver thread, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Service offered by the daemon.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Worker threads started by the daemon.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Time the daemon waits for workers after a shutdown signal, in
    /// milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: DEFAULT_PORT,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_attempts: DEFAULT_CALL_ATTEMPTS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            service_name: default_service_name(),
            workers: DEFAULT_WORKERS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Returns a copy of this configuration bound to `port`.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// Local address the datagram socket binds to.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    /// Configured UDP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// CONNECT transmissions before a handshake fails.
    #[must_use]
    pub const fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Wait per CONNECT transmission.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// QUERY transmissions before a call fails.
    #[must_use]
    pub const fn call_attempts(&self) -> u32 {
        self.call_attempts
    }

    /// Wait per QUERY transmission.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Pending queries held per service.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Read timeout of the receiver thread.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Service offered by the daemon.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Worker threads started by the daemon.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Time the daemon waits for workers after a shutdown signal.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Rejects values the engine cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_attempts == 0 {
            return Err(ConfigError::zero("connect_attempts"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::zero("connect_timeout_ms"));
        }
        if self.call_attempts == 0 {
            return Err(ConfigError::zero("call_attempts"));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::zero("call_timeout_ms"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::zero("queue_capacity"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::zero("poll_interval_ms"));
        }
        if self.workers == 0 {
            return Err(ConfigError::zero("workers"));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::zero("shutdown_timeout_ms"));
        }
        let name_len = self.service_name.len();
        if name_len == 0 || name_len > MAX_SERVICE_NAME_BYTES {
            return Err(ConfigError::ServiceName {
                name: self.service_name.clone(),
                max: MAX_SERVICE_NAME_BYTES,
            });
        }
        Ok(())
    }
}

/// Errors raised by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A budget, timeout or bound was configured as zero.
    #[error("setting '{field}' must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The daemon service name is empty or too long.
    #[error("service name '{name}' must be between 1 and {max} bytes")]
    ServiceName {
        /// Configured name.
        name: String,
        /// Maximum accepted length in bytes.
        max: usize,
    },
}

impl ConfigError {
    const fn zero(field: &'static str) -> Self {
        Self::Zero { field }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_validate() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[rstest]
    fn durations_follow_millisecond_fields() {
        let config = Config {
            call_timeout_ms: 40,
            connect_timeout_ms: 15,
            poll_interval_ms: 5,
            shutdown_timeout_ms: 900,
            ..Config::default()
        };
        assert_eq!(config.call_timeout(), Duration::from_millis(40));
        assert_eq!(config.connect_timeout(), Duration::from_millis(15));
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(900));
    }

    #[rstest]
    #[case::connect_attempts(Config { connect_attempts: 0, ..Config::default() }, "connect_attempts")]
    #[case::call_attempts(Config { call_attempts: 0, ..Config::default() }, "call_attempts")]
    #[case::call_timeout(Config { call_timeout_ms: 0, ..Config::default() }, "call_timeout_ms")]
    #[case::queue(Config { queue_capacity: 0, ..Config::default() }, "queue_capacity")]
    #[case::workers(Config { workers: 0, ..Config::default() }, "workers")]
    #[case::shutdown(Config { shutdown_timeout_ms: 0, ..Config::default() }, "shutdown_timeout_ms")]
    fn zero_settings_are_rejected(#[case] config: Config, #[case] field: &'static str) {
        assert_eq!(config.validate(), Err(ConfigError::Zero { field }));
    }

    #[rstest]
    #[case::empty(String::new())]
    #[case::too_long("s".repeat(MAX_SERVICE_NAME_BYTES + 1))]
    fn bad_service_names_are_rejected(#[case] name: String) {
        let config = Config {
            service_name: name,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServiceName { .. })
        ));
    }

    #[rstest]
    fn with_port_keeps_other_settings() {
        let config = Config {
            call_attempts: 9,
            ..Config::default()
        };
        let rebound = config.with_port(9000);
        assert_eq!(rebound.port(), 9000);
        assert_eq!(rebound.call_attempts(), 9);
    }
}
