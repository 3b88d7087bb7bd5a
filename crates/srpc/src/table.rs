//! Connection table shared by clients, servers and the receiver thread.
//!
//! The table is plain data: it is only ever reached through the engine lock,
//! which is also the lock [`crate::SuspendGuard`] holds. Identifiers are handed
//! out from a monotonically increasing counter so a stale handle never aliases
//! a newer connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar};

use tracing::trace;

use crate::Endpoint;
use crate::engine::ServiceId;

const TABLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::table");

/// Identifier of a connection, unique within the process that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw identifier as carried on the wire.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Which side of the exchange created the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created by `connect`; issues calls.
    Client,
    /// Created by the receiver on an accepted CONNECT; answers queries.
    Server,
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet registered.
    Init,
    /// Handshake accepted, being registered.
    Connecting,
    /// Ready for a call (client) or serving queries (server).
    Connected,
    /// A call is outstanding.
    AwaitingResponse,
    /// Removed from the table.
    Closed,
}

/// Read-only view of a table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Local identifier.
    pub id: ConnectionId,
    /// Side of the exchange.
    pub role: Role,
    /// Remote endpoint.
    pub peer: Endpoint,
    /// Service targeted or served.
    pub service: String,
    /// Next sequence to send (client) or expected (server).
    pub seq: u64,
    /// Lifecycle state.
    pub state: ConnectionState,
}

/// Last response sent on a server connection.
#[derive(Debug, Clone)]
pub(crate) struct CachedResponse {
    pub(crate) seq: u64,
    pub(crate) datagram: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum Side {
    Client {
        /// Identifier the server assigned; carried in QUERY datagrams.
        remote: ConnectionId,
        /// Payload of the matched response, waiting for the caller.
        reply: Option<Vec<u8>>,
        wake: Arc<Condvar>,
    },
    Server {
        service: ServiceId,
        nonce: u32,
        initial_seq: u64,
        cached: Option<CachedResponse>,
    },
}

/// What the receiver should do with an inbound QUERY.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum QueryDisposition<'a> {
    /// First sighting of this sequence.
    Novel,
    /// Retransmission of the last answered sequence.
    Replay(&'a [u8]),
    /// Retransmission of a sequence with no cached answer.
    Duplicate,
}

/// What the receiver did with an inbound RESPONSE.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ResponseDisposition {
    /// Completed the outstanding call.
    Matched,
    /// Sequence earlier than the current one.
    Stale,
    /// No call outstanding, or a sequence from the future.
    Unexpected,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) peer: Endpoint,
    pub(crate) service: String,
    /// Client: next sequence to send. Server: next sequence expected.
    pub(crate) seq: u64,
    pub(crate) state: ConnectionState,
    pub(crate) side: Side,
}

impl Connection {
    pub(crate) fn client(
        id: ConnectionId,
        peer: Endpoint,
        service: String,
        seq: u64,
        remote: ConnectionId,
    ) -> Self {
        Self {
            id,
            peer,
            service,
            seq,
            state: ConnectionState::Init,
            side: Side::Client {
                remote,
                reply: None,
                wake: Arc::new(Condvar::new()),
            },
        }
    }

    pub(crate) fn server(
        id: ConnectionId,
        peer: Endpoint,
        service_name: String,
        service: ServiceId,
        nonce: u32,
        initial_seq: u64,
    ) -> Self {
        Self {
            id,
            peer,
            service: service_name,
            seq: initial_seq,
            state: ConnectionState::Init,
            side: Side::Server {
                service,
                nonce,
                initial_seq,
                cached: None,
            },
        }
    }

    pub(crate) const fn role(&self) -> Role {
        match self.side {
            Side::Client { .. } => Role::Client,
            Side::Server { .. } => Role::Server,
        }
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        trace!(
            target: TABLE_TARGET,
            connection = %self.id,
            from = ?self.state,
            to = ?next,
            "connection state change"
        );
        self.state = next;
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            role: self.role(),
            peer: self.peer,
            service: self.service.clone(),
            seq: self.seq,
            state: self.state,
        }
    }

    /// Condition variable a caller waits on, for client connections.
    pub(crate) fn wake(&self) -> Option<Arc<Condvar>> {
        match &self.side {
            Side::Client { wake, .. } => Some(Arc::clone(wake)),
            Side::Server { .. } => None,
        }
    }

    pub(crate) const fn served_by(&self) -> Option<ServiceId> {
        match self.side {
            Side::Server { service, .. } => Some(service),
            Side::Client { .. } => None,
        }
    }

    /// Classifies a QUERY sequence on a server connection.
    pub(crate) fn check_query(&self, seq: u64) -> QueryDisposition<'_> {
        if seq >= self.seq {
            return QueryDisposition::Novel;
        }
        match &self.side {
            Side::Server {
                cached: Some(cached),
                ..
            } if cached.seq == seq => QueryDisposition::Replay(&cached.datagram),
            _ => QueryDisposition::Duplicate,
        }
    }

    /// Records that `seq` was handed to the service queue.
    pub(crate) fn accept_query(&mut self, seq: u64) {
        self.seq = seq.saturating_add(1);
    }

    /// Replaces the cached response of a server connection.
    pub(crate) fn cache_response(&mut self, seq: u64, datagram: Vec<u8>) {
        if let Side::Server { cached, .. } = &mut self.side {
            *cached = Some(CachedResponse { seq, datagram });
        }
    }

    /// Offers a RESPONSE to a client connection.
    pub(crate) fn offer_response(&mut self, seq: u64, payload: Vec<u8>) -> ResponseDisposition {
        if seq < self.seq {
            return ResponseDisposition::Stale;
        }
        if seq > self.seq || self.state != ConnectionState::AwaitingResponse {
            return ResponseDisposition::Unexpected;
        }
        match &mut self.side {
            Side::Client { reply, wake, .. } if reply.is_none() => {
                *reply = Some(payload);
                wake.notify_all();
                ResponseDisposition::Matched
            }
            _ => ResponseDisposition::Unexpected,
        }
    }

    /// Takes the matched response of a client connection, if any.
    pub(crate) fn take_reply(&mut self) -> Option<Vec<u8>> {
        match &mut self.side {
            Side::Client { reply, .. } => reply.take(),
            Side::Server { .. } => None,
        }
    }
}

/// Mapping from connection identifier to connection state.
#[derive(Debug)]
pub(crate) struct ConnectionTable {
    entries: HashMap<ConnectionId, Connection>,
    next_id: u32,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }
}

impl ConnectionTable {
    /// Hands out an identifier not used by any live connection.
    pub(crate) fn allocate_id(&mut self) -> ConnectionId {
        loop {
            let candidate = ConnectionId(self.next_id);
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub(crate) fn insert(&mut self, connection: Connection) {
        self.entries.insert(connection.id, connection);
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut removed = self.entries.remove(&id)?;
        removed.transition(ConnectionState::Closed);
        Some(removed)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, returning them so waiters can be woken.
    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        self.entries
            .drain()
            .map(|(_, mut connection)| {
                connection.transition(ConnectionState::Closed);
                connection
            })
            .collect()
    }

    /// Removes every server connection routed to `service`.
    pub(crate) fn remove_served_by(&mut self, service: ServiceId) -> Vec<Connection> {
        let ids: Vec<ConnectionId> = self
            .entries
            .values()
            .filter(|connection| connection.served_by() == Some(service))
            .map(|connection| connection.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Client connection talking to `remote` on `peer`.
    pub(crate) fn find_client_mut(
        &mut self,
        peer: Endpoint,
        remote: ConnectionId,
    ) -> Option<&mut Connection> {
        self.entries.values_mut().find(|connection| {
            connection.peer == peer
                && matches!(connection.side, Side::Client { remote: r, .. } if r == remote)
        })
    }

    /// Server connection created by the CONNECT `(peer, nonce)`.
    pub(crate) fn find_handshake(&self, peer: Endpoint, nonce: u32) -> Option<(ConnectionId, u64)> {
        self.entries.values().find_map(|connection| match connection.side {
            Side::Server {
                nonce: n,
                initial_seq,
                ..
            } if connection.peer == peer && n == nonce => Some((connection.id, initial_seq)),
            _ => None,
        })
    }

    /// Snapshot of every entry, ordered by identifier.
    pub(crate) fn infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self.entries.values().map(Connection::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}
