//! Suspension and socket reinitialisation.
//!
//! A process that forks while the engine runs must not let a child inherit a
//! half-updated table. The parent suspends the engine around the fork and the
//! child rebinds to a port of its own with [`SuspendGuard::reinit`].

use std::mem;
use std::sync::{Arc, MutexGuard};

use tracing::{debug, info};

use crate::Endpoint;
use crate::errors::{InitFailure, RpcError};
use crate::table::ConnectionInfo;
use crate::transport::DatagramSocket;

use super::{EngineState, Rpc, Shared};

const CONTROL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::control");

/// Exclusive hold on the engine lock.
///
/// While the guard lives no handshake, call, query, response or dispatch
/// activity makes progress. Dropping the guard resumes the engine.
#[derive(Debug)]
#[must_use = "the engine resumes as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    state: MutexGuard<'a, EngineState>,
    shared: &'a Arc<Shared>,
}

impl SuspendGuard<'_> {
    /// Releases the engine lock.
    pub fn resume(self) {
        drop(self);
    }

    /// Rebinds the engine to `port` and discards all connection state.
    ///
    /// The new socket is bound before anything else changes. On success every
    /// connection, pending handshake and queued query is dropped, blocked
    /// callers and workers are woken to fail, and offered services stay
    /// offered. A receiver thread is started for the new socket when none runs
    /// in this process, as in a child forked while the engine was suspended.
    ///
    /// The receiver is woken off the previous socket, which closes once the
    /// receiver lets go of it, normally before this returns. Rebinding the old
    /// port straight away may still need a short retry.
    ///
    /// # Errors
    ///
    /// Returns an init error, with nothing changed, when the port cannot be
    /// bound or the receiver thread cannot be started.
    pub fn reinit(&mut self, port: u16) -> Result<Endpoint, RpcError> {
        let settings = self.shared.settings();
        let socket = DatagramSocket::bind(&settings.bind_host, port, settings.poll_interval)
            .map_err(InitFailure::from)?;
        self.shared.ensure_receiver()?;
        let state = &mut *self.state;
        let dropped = state.table.drain();
        for connection in &dropped {
            if let Some(wake) = connection.wake() {
                wake.notify_all();
            }
        }
        for (_, handshake) in state.handshakes.drain() {
            handshake.wake.notify_all();
        }
        state.services.reset();
        let previous = mem::replace(&mut state.socket, Arc::new(socket));
        state.epoch = state.epoch.wrapping_add(1);
        let local = state.socket.local_endpoint();
        release_receiver(&previous);
        info!(
            target: CONTROL_TARGET,
            previous = %previous.local_endpoint(),
            local = %local,
            dropped = dropped.len(),
            epoch = state.epoch,
            "engine reinitialised"
        );
        Ok(local)
    }

    /// Number of entries in the connection table.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.table.len()
    }

    /// Snapshot of every connection, ordered by id.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.state.table.infos()
    }

    /// Address and port peers should use to reach this engine.
    #[must_use]
    pub fn local_endpoint(&self) -> Endpoint {
        self.state.socket.local_endpoint()
    }
}

/// Wakes a receiver blocked on `previous` so it lets go of the socket.
///
/// The empty datagram fails to decode and is dropped.
fn release_receiver(previous: &DatagramSocket) {
    if let Err(error) = previous.send_to(previous.local_endpoint(), &[]) {
        debug!(
            target: CONTROL_TARGET,
            error = %error,
            "could not wake receiver on the previous socket"
        );
    }
}

impl Rpc {
    /// Takes the engine lock until the returned guard is resumed or dropped.
    ///
    /// # Errors
    ///
    /// Fails only when the engine lock is poisoned.
    pub fn suspend(&self) -> Result<SuspendGuard<'_>, RpcError> {
        let state = self.shared.lock()?;
        info!(target: CONTROL_TARGET, "engine suspended");
        Ok(SuspendGuard {
            state,
            shared: &self.shared,
        })
    }

    /// Suspends the engine, rebinds it to `port` and resumes it.
    ///
    /// # Errors
    ///
    /// See [`SuspendGuard::reinit`].
    pub fn reinit(&self, port: u16) -> Result<Endpoint, RpcError> {
        let mut guard = self.suspend()?;
        guard.reinit(port)
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        info!(target: CONTROL_TARGET, "engine resumed");
    }
}
