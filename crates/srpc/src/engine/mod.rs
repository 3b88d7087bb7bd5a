//! The RPC engine: one socket, one lock, one receiver thread.
//!
//! [`Rpc`] owns a [`Mutex`] over the whole engine state: the active socket,
//! the connection table, the service registry and the pending handshakes.
//! Client callers and service workers block on condition variables tied to
//! that mutex, so holding it through [`Rpc::suspend`] freezes every
//! operation, wake-ups included.
//!
//! The receiver thread clones the active socket and the transport epoch under
//! the lock, reads one datagram without it, and re-locks to route the datagram.
//! A datagram read from a socket that has since been swapped out by a reinit
//! carries a stale epoch and is discarded.

mod client;
mod control;
mod dispatch;
mod service;

use std::collections::HashMap;
use std::mem;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use srpc_config::Config;
use tracing::{debug, info};

use crate::errors::{InitFailure, RpcError};
use crate::table::{ConnectionInfo, ConnectionTable};
use crate::transport::DatagramSocket;
use crate::Endpoint;

pub use client::ConnectionHandle;
pub use control::SuspendGuard;
pub use service::{RpcEndpoint, ServiceHandle};
pub(crate) use service::{ServiceId, ServiceRegistry};

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Retransmission budgets and bounds copied out of [`Config`].
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) bind_host: String,
    pub(crate) connect_attempts: u32,
    pub(crate) connect_timeout: Duration,
    pub(crate) call_attempts: u32,
    pub(crate) call_timeout: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) poll_interval: Duration,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            bind_host: config.bind_host().to_owned(),
            connect_attempts: config.connect_attempts(),
            connect_timeout: config.connect_timeout(),
            call_attempts: config.call_attempts(),
            call_timeout: config.call_timeout(),
            queue_capacity: config.queue_capacity(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// A CONNECT awaiting its acknowledgement.
#[derive(Debug)]
pub(crate) struct PendingHandshake {
    pub(crate) peer: Endpoint,
    pub(crate) seq: u64,
    pub(crate) accepted: Option<crate::table::ConnectionId>,
    pub(crate) wake: Arc<Condvar>,
}

/// Everything guarded by the engine lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) socket: Arc<DatagramSocket>,
    /// Bumped whenever the socket is swapped.
    pub(crate) epoch: u64,
    pub(crate) table: ConnectionTable,
    pub(crate) services: ServiceRegistry,
    pub(crate) handshakes: HashMap<u32, PendingHandshake>,
}

/// Receiver thread and the process that spawned it.
///
/// A forked child inherits the handle but not the thread, so the pid tells a
/// live receiver from a stale one.
#[derive(Debug)]
struct Receiver {
    handle: JoinHandle<()>,
    pid: u32,
}

impl Receiver {
    fn serves_this_process(&self) -> bool {
        self.pid == process::id() && !self.handle.is_finished()
    }

    /// Joins the thread if this process owns it; otherwise forgets the handle.
    fn retire(self) {
        if self.pid != process::id() {
            mem::forget(self.handle);
            return;
        }
        if self.handle.join().is_err() {
            debug!(target: ENGINE_TARGET, "receiver thread panicked");
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<EngineState>,
    settings: Settings,
    running: AtomicBool,
    nonce: AtomicU32,
    receiver: Mutex<Option<Receiver>>,
}

impl Shared {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, EngineState>, RpcError> {
        self.state.lock().map_err(|_| RpcError::poisoned())
    }

    pub(crate) const fn settings(&self) -> &Settings {
        &self.settings
    }

    fn next_nonce(&self) -> u32 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts a receiver thread unless one is already running in this process.
    ///
    /// The new thread blocks on the engine lock until the caller releases it.
    pub(crate) fn ensure_receiver(self: &Arc<Self>) -> Result<(), RpcError> {
        let mut slot = self.receiver.lock().map_err(|_| RpcError::poisoned())?;
        if slot.as_ref().is_some_and(Receiver::serves_this_process) {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            debug!(
                target: ENGINE_TARGET,
                owner = stale.pid,
                pid = process::id(),
                "replacing receiver thread"
            );
            stale.retire();
        }
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("srpc-receiver".to_owned())
            .spawn(move || dispatch::run(&shared))
            .map_err(InitFailure::Spawn)?;
        *slot = Some(Receiver {
            handle,
            pid: process::id(),
        });
        Ok(())
    }

    fn stop_receiver(&self) {
        self.running.store(false, Ordering::SeqCst);
        let receiver = match self.receiver.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(receiver) = receiver {
            receiver.retire();
        }
    }
}

/// Waits on `wake` until notified or `deadline` passes.
pub(crate) fn wait_until<'a>(
    wake: &Condvar,
    guard: MutexGuard<'a, EngineState>,
    deadline: Instant,
) -> Result<MutexGuard<'a, EngineState>, RpcError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    wake.wait_timeout(guard, remaining)
        .map(|(guard, _)| guard)
        .map_err(|_| RpcError::poisoned())
}

/// Waits on `wake` until notified.
pub(crate) fn wait<'a>(
    wake: &Condvar,
    guard: MutexGuard<'a, EngineState>,
) -> Result<MutexGuard<'a, EngineState>, RpcError> {
    wake.wait(guard).map_err(|_| RpcError::poisoned())
}

fn nonce_seed() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.subsec_nanos());
    nanos ^ process::id().rotate_left(16)
}

/// Handle to a running engine.
///
/// Operations take `&self`; share the engine between threads with an
/// [`Arc`]. Dropping it stops and joins the receiver thread when this process
/// started it.
#[derive(Debug)]
pub struct Rpc {
    shared: Arc<Shared>,
}

impl Rpc {
    /// Starts an engine on `port` with default settings; zero picks an
    /// ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCategory::Init`](crate::ErrorCategory::Init) error
    /// when the socket cannot be bound.
    pub fn init(port: u16) -> Result<Self, RpcError> {
        Self::with_config(&Config::default().with_port(port))
    }

    /// Starts an engine from a resolved configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, the socket cannot be bound or
    /// the receiver thread cannot be spawned.
    pub fn with_config(config: &Config) -> Result<Self, RpcError> {
        config.validate().map_err(InitFailure::from)?;
        let settings = Settings::from(config);
        let socket = DatagramSocket::bind(&settings.bind_host, config.port(), settings.poll_interval)
            .map_err(InitFailure::from)?;
        let local = socket.local_endpoint();
        let bound = socket.bound_endpoint();
        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                socket: Arc::new(socket),
                epoch: 0,
                table: ConnectionTable::default(),
                services: ServiceRegistry::default(),
                handshakes: HashMap::new(),
            }),
            settings,
            running: AtomicBool::new(true),
            nonce: AtomicU32::new(nonce_seed()),
            receiver: Mutex::new(None),
        });
        shared.ensure_receiver()?;
        info!(
            target: ENGINE_TARGET,
            local = %local,
            bound = %bound,
            "engine started"
        );
        Ok(Self { shared })
    }

    /// Address and port peers should use to reach this engine.
    ///
    /// # Errors
    ///
    /// Fails only when the engine lock is poisoned.
    pub fn local_endpoint(&self) -> Result<Endpoint, RpcError> {
        Ok(self.shared.lock()?.socket.local_endpoint())
    }

    /// Snapshot of one client connection.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a handle that is no longer open.
    pub fn connection_info(&self, connection: ConnectionHandle) -> Result<ConnectionInfo, RpcError> {
        let state = self.shared.lock()?;
        client::lookup(&state.table, connection).map(crate::table::Connection::info)
    }

    /// Snapshot of every connection, client and server, ordered by id.
    ///
    /// # Errors
    ///
    /// Fails only when the engine lock is poisoned.
    pub fn connections(&self) -> Result<Vec<ConnectionInfo>, RpcError> {
        Ok(self.shared.lock()?.table.infos())
    }

    /// Number of entries in the connection table.
    ///
    /// # Errors
    ///
    /// Fails only when the engine lock is poisoned.
    pub fn connection_count(&self) -> Result<usize, RpcError> {
        Ok(self.shared.lock()?.table.len())
    }

    /// Number of queries waiting for a worker on `service`.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the service is not offered.
    pub fn pending_queries(&self, service: ServiceHandle) -> Result<usize, RpcError> {
        let state = self.shared.lock()?;
        state
            .services
            .get(service.id())
            .map(service::Service::pending)
            .ok_or_else(|| crate::errors::UsageViolation::StaleService { service }.into())
    }
}

impl Drop for Rpc {
    fn drop(&mut self) {
        self.shared.stop_receiver();
        info!(target: ENGINE_TARGET, "engine stopped");
    }
}
