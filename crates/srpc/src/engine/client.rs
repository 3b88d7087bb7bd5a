//! Client side: handshake, calls with retransmission, disconnect.

use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::Endpoint;
use crate::errors::{CallFailure, HandshakeFailure, RpcError, UsageViolation};
use crate::table::{Connection, ConnectionId, ConnectionState, ConnectionTable, Role, Side};
use crate::transport::{TransportError, lookup as resolve, prefer_family};
use crate::wire::{
    encode_connect, encode_disconnect, encode_query, validate_payload, validate_service_name,
};

use super::{PendingHandshake, Rpc, wait_until};

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Handle to a client connection returned by [`Rpc::connect`].
///
/// Identifiers are never reused, so a handle kept past
/// [`Rpc::disconnect`] or a reinit is rejected rather than aliasing a newer
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(ConnectionId);

impl ConnectionHandle {
    /// Local identifier of the connection.
    #[must_use]
    pub const fn id(self) -> ConnectionId {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "connection {}", self.0)
    }
}

/// Resolves a handle to its live client entry.
pub(super) fn lookup(
    table: &ConnectionTable,
    connection: ConnectionHandle,
) -> Result<&Connection, RpcError> {
    table
        .get(connection.0)
        .filter(|entry| entry.role() == Role::Client)
        .ok_or_else(|| UsageViolation::StaleConnection { connection }.into())
}

impl Rpc {
    /// Opens a connection to `service` hosted at `host:port`.
    ///
    /// `seq` is the first sequence number the connection will use. CONNECT is
    /// retransmitted until acknowledged or the configured budget runs out; on
    /// failure the connection table is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an invalid service name and a handshake error
    /// when resolution fails, the budget is exhausted or the engine is
    /// reinitialised meanwhile.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        service: &str,
        seq: u64,
    ) -> Result<ConnectionHandle, RpcError> {
        validate_service_name(service)?;
        let settings = self.shared.settings();
        let resolve_failed = |source: TransportError| {
            RpcError::handshake(service, HandshakeFailure::Resolve(source))
        };
        let candidates = resolve(host, port).map_err(resolve_failed)?;
        let mut state = self.shared.lock()?;
        let peer = prefer_family(&candidates, state.socket.local_endpoint())
            .map(Endpoint::from)
            .ok_or_else(|| {
                resolve_failed(TransportError::ResolveEmpty {
                    host: host.to_owned(),
                    port,
                })
            })?;
        let mut nonce = self.shared.next_nonce();
        while state.handshakes.contains_key(&nonce) {
            nonce = self.shared.next_nonce();
        }
        let datagram = encode_connect(nonce, seq, service)?;
        let wake = Arc::new(Condvar::new());
        state.handshakes.insert(
            nonce,
            PendingHandshake {
                peer,
                seq,
                accepted: None,
                wake: Arc::clone(&wake),
            },
        );
        debug!(
            target: CLIENT_TARGET,
            peer = %peer,
            service,
            nonce,
            seq,
            "handshake started"
        );

        for attempt in 1..=settings.connect_attempts {
            if !state.handshakes.contains_key(&nonce) {
                return Err(RpcError::handshake(service, HandshakeFailure::Reset));
            }
            if let Err(source) = state.socket.send_to(peer, &datagram) {
                state.handshakes.remove(&nonce);
                return Err(RpcError::handshake(service, HandshakeFailure::Send(source)));
            }
            let deadline = Instant::now() + settings.connect_timeout;
            loop {
                let accepted = match state.handshakes.get(&nonce) {
                    None => return Err(RpcError::handshake(service, HandshakeFailure::Reset)),
                    Some(pending) => pending.accepted,
                };
                if let Some(remote) = accepted {
                    state.handshakes.remove(&nonce);
                    let id = state.table.allocate_id();
                    let mut entry = Connection::client(id, peer, service.to_owned(), seq, remote);
                    entry.transition(ConnectionState::Connecting);
                    entry.transition(ConnectionState::Connected);
                    state.table.insert(entry);
                    info!(
                        target: CLIENT_TARGET,
                        peer = %peer,
                        service,
                        connection = %id,
                        remote = %remote,
                        attempt,
                        "connection established"
                    );
                    return Ok(ConnectionHandle(id));
                }
                if Instant::now() >= deadline {
                    break;
                }
                state = wait_until(&wake, state, deadline)?;
            }
            debug!(
                target: CLIENT_TARGET,
                peer = %peer,
                service,
                attempt,
                "handshake attempt timed out"
            );
        }
        state.handshakes.remove(&nonce);
        Err(RpcError::handshake(
            service,
            HandshakeFailure::Exhausted {
                attempts: settings.connect_attempts,
            },
        ))
    }

    /// Sends the first `query_len` bytes of `query` and waits for the reply.
    ///
    /// The reply is copied into `response` and its length returned. QUERY is
    /// retransmitted until a RESPONSE with the same sequence arrives or the
    /// configured budget runs out.
    ///
    /// # Errors
    ///
    /// Usage errors are returned without sending anything: `query_len` larger
    /// than `query`, a payload above the wire maximum, a stale handle or a call
    /// already outstanding. Call errors cover an exhausted budget, a response
    /// longer than `response` (left untouched), a disconnect or reinit while
    /// waiting and send failures.
    pub fn call(
        &self,
        connection: ConnectionHandle,
        query: &[u8],
        query_len: usize,
        response: &mut [u8],
    ) -> Result<usize, RpcError> {
        let payload = query
            .get(..query_len)
            .ok_or(UsageViolation::LengthExceedsCapacity {
                len: query_len,
                capacity: query.len(),
            })?;
        validate_payload(payload)?;
        let settings = self.shared.settings();
        let mut state = self.shared.lock()?;
        let epoch = state.epoch;
        let entry = state
            .table
            .get_mut(connection.0)
            .filter(|entry| entry.role() == Role::Client)
            .ok_or(UsageViolation::StaleConnection { connection })?;
        if entry.state == ConnectionState::AwaitingResponse {
            return Err(UsageViolation::CallOutstanding { connection }.into());
        }
        let Side::Client { remote, wake, .. } = &entry.side else {
            return Err(UsageViolation::StaleConnection { connection }.into());
        };
        let wake = Arc::clone(wake);
        let seq = entry.seq;
        let peer = entry.peer;
        let datagram = encode_query(*remote, seq, payload)?;
        entry.transition(ConnectionState::AwaitingResponse);

        for attempt in 1..=settings.call_attempts {
            if let Err(source) = state.socket.send_to(peer, &datagram) {
                if let Some(entry) = state.table.get_mut(connection.0) {
                    entry.transition(ConnectionState::Connected);
                }
                return Err(RpcError::call(connection, CallFailure::Send(source)));
            }
            let deadline = Instant::now() + settings.call_timeout;
            loop {
                let Some(entry) = state.table.get_mut(connection.0) else {
                    let reason = if state.epoch == epoch {
                        CallFailure::Closed
                    } else {
                        CallFailure::Reset
                    };
                    return Err(RpcError::call(connection, reason));
                };
                if let Some(reply) = entry.take_reply() {
                    entry.seq = seq.wrapping_add(1);
                    entry.transition(ConnectionState::Connected);
                    return copy_reply(connection, &reply, response);
                }
                if Instant::now() >= deadline {
                    break;
                }
                state = wait_until(&wake, state, deadline)?;
            }
            debug!(
                target: CLIENT_TARGET,
                connection = %connection.0,
                seq,
                attempt,
                "call attempt timed out"
            );
        }
        if let Some(entry) = state.table.get_mut(connection.0) {
            entry.transition(ConnectionState::Connected);
        }
        warn!(
            target: CLIENT_TARGET,
            connection = %connection.0,
            peer = %peer,
            seq,
            "call retry budget exhausted"
        );
        Err(RpcError::call(
            connection,
            CallFailure::Exhausted {
                attempts: settings.call_attempts,
            },
        ))
    }

    /// Closes a client connection.
    ///
    /// The entry is removed immediately and a call blocked on it fails. A
    /// DISCONNECT is sent to the server on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the handle is no longer open.
    pub fn disconnect(&self, connection: ConnectionHandle) -> Result<(), RpcError> {
        let mut state = self.shared.lock()?;
        lookup(&state.table, connection)?;
        let Some(removed) = state.table.remove(connection.0) else {
            return Err(UsageViolation::StaleConnection { connection }.into());
        };
        if let Some(wake) = removed.wake() {
            wake.notify_all();
        }
        if let Side::Client { remote, .. } = removed.side
            && let Err(error) = state
                .socket
                .send_to(removed.peer, &encode_disconnect(remote))
        {
            debug!(
                target: CLIENT_TARGET,
                peer = %removed.peer,
                error = %error,
                "disconnect notice not sent"
            );
        }
        info!(
            target: CLIENT_TARGET,
            connection = %connection.0,
            peer = %removed.peer,
            "connection closed"
        );
        Ok(())
    }
}

fn copy_reply(
    connection: ConnectionHandle,
    reply: &[u8],
    response: &mut [u8],
) -> Result<usize, RpcError> {
    let capacity = response.len();
    let Some(target) = response.get_mut(..reply.len()) else {
        return Err(RpcError::call(
            connection,
            CallFailure::ResponseTooLarge {
                needed: reply.len(),
                capacity,
            },
        ));
    };
    target.copy_from_slice(reply);
    Ok(reply.len())
}
