//! Default values shared by the engine, the daemon and serde.

/// Local address the engine binds its datagram socket to.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Port requested when none is configured; zero asks for an ephemeral port.
pub const DEFAULT_PORT: u16 = 0;

/// Number of CONNECT transmissions before a handshake fails.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Wait per CONNECT transmission, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 200;

/// Number of QUERY transmissions before a call fails.
pub const DEFAULT_CALL_ATTEMPTS: u32 = 6;

/// Wait per QUERY transmission, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 250;

/// Bounded length of each service's pending query queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Read timeout of the receiver thread, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Service offered by the daemon binary.
pub const DEFAULT_SERVICE_NAME: &str = "echo";

/// Worker threads started by the daemon binary.
pub const DEFAULT_WORKERS: usize = 2;

/// Time the daemon waits for workers to stop after a shutdown signal, in
/// milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Longest service name accepted on the wire, in bytes.
pub const MAX_SERVICE_NAME_BYTES: usize = 64;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Owned bind host used where allocation is required (e.g. serde).
pub fn default_bind_host() -> String {
    DEFAULT_BIND_HOST.to_owned()
}

/// Default port for serde.
pub fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Default connect attempt budget for serde.
pub fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

/// Default connect timeout for serde.
pub fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Default call attempt budget for serde.
pub fn default_call_attempts() -> u32 {
    DEFAULT_CALL_ATTEMPTS
}

/// Default call timeout for serde.
pub fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

/// Default queue capacity for serde.
pub fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Default receiver poll interval for serde.
pub fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Owned daemon service name for serde.
pub fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_owned()
}

/// Default daemon worker count for serde.
pub fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// Default shutdown budget for serde.
pub fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
