//! The receiver thread and datagram routing.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::Endpoint;
use crate::table::{
    Connection, ConnectionId, ConnectionState, QueryDisposition, ResponseDisposition, Role,
};
use crate::wire::{Exchange, MAX_DATAGRAM_SIZE, Message, encode_connect_ack};

use super::service::{QueuedQuery, RpcEndpoint};
use super::{EngineState, Shared};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
const ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Receives and routes datagrams until the engine is dropped.
pub(super) fn run(shared: &Shared) {
    let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
    let mut last_error = None::<io::ErrorKind>;
    debug!(target: DISPATCH_TARGET, "receiver thread started");
    while shared.running.load(Ordering::SeqCst) {
        let (socket, epoch) = match shared.lock() {
            Ok(state) => (Arc::clone(&state.socket), state.epoch),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, error = %error, "receiver stopping");
                return;
            }
        };
        match socket.receive(&mut buf) {
            Ok(Some((peer, len))) => {
                last_error = None;
                if let Some(datagram) = buf.get(..len) {
                    route(shared, epoch, peer, datagram);
                }
            }
            Ok(None) => {}
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: DISPATCH_TARGET,
                        error = %error,
                        "datagram receive error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!(target: DISPATCH_TARGET, "receiver thread stopped");
}

fn route(shared: &Shared, epoch: u64, peer: Endpoint, datagram: &[u8]) {
    let message = match Message::decode(datagram) {
        Ok(message) => message,
        Err(error) => {
            debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                len = datagram.len(),
                error = %error,
                "dropping malformed datagram"
            );
            return;
        }
    };
    let Ok(mut state) = shared.lock() else {
        return;
    };
    if state.epoch != epoch {
        debug!(
            target: DISPATCH_TARGET,
            peer = %peer,
            kind = ?message.kind(),
            "dropping datagram read from a replaced socket"
        );
        return;
    }
    trace!(
        target: DISPATCH_TARGET,
        peer = %peer,
        kind = ?message.kind(),
        "datagram received"
    );
    match message {
        Message::Connect {
            nonce,
            seq,
            service,
        } => state.on_connect(peer, nonce, seq, service),
        Message::ConnectAck {
            nonce,
            seq,
            connection,
        } => state.on_connect_ack(peer, nonce, seq, connection),
        Message::Query(exchange) => state.on_query(peer, exchange),
        Message::Response(exchange) => state.on_response(peer, exchange),
        Message::Disconnect { connection } => state.on_disconnect(peer, connection),
    }
}

impl EngineState {
    fn on_connect(&mut self, peer: Endpoint, nonce: u32, seq: u64, name: String) {
        let Some(service) = self.services.id_for(&name) else {
            debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                service = %name,
                "dropping CONNECT for a service not offered"
            );
            return;
        };
        if let Some((existing, initial_seq)) = self.table.find_handshake(peer, nonce) {
            if initial_seq == seq {
                trace!(
                    target: DISPATCH_TARGET,
                    peer = %peer,
                    connection = %existing,
                    "answering retransmitted CONNECT"
                );
                self.send_ack(peer, nonce, seq, existing);
                return;
            }
            self.close_server_connection(existing);
        }
        let id = self.table.allocate_id();
        let mut connection = Connection::server(id, peer, name, service, nonce, seq);
        connection.transition(ConnectionState::Connecting);
        connection.transition(ConnectionState::Connected);
        debug!(
            target: DISPATCH_TARGET,
            peer = %peer,
            service = %connection.service,
            connection = %id,
            seq,
            "server connection created"
        );
        self.table.insert(connection);
        if let Some(entry) = self.services.get_mut(service) {
            entry.attach(id);
        }
        self.send_ack(peer, nonce, seq, id);
    }

    fn send_ack(&self, peer: Endpoint, nonce: u32, seq: u64, connection: ConnectionId) {
        if let Err(error) = self
            .socket
            .send_to(peer, &encode_connect_ack(nonce, seq, connection))
        {
            warn!(
                target: DISPATCH_TARGET,
                peer = %peer,
                error = %error,
                "failed to send CONNECT_ACK"
            );
        }
    }

    fn on_connect_ack(&mut self, peer: Endpoint, nonce: u32, seq: u64, connection: ConnectionId) {
        match self.handshakes.get_mut(&nonce) {
            Some(pending) if pending.peer == peer && pending.seq == seq => {
                if pending.accepted.is_none() {
                    pending.accepted = Some(connection);
                    pending.wake.notify_all();
                }
            }
            _ => debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                nonce,
                "dropping unmatched CONNECT_ACK"
            ),
        }
    }

    fn on_query(&mut self, peer: Endpoint, exchange: Exchange) {
        let Exchange {
            connection: id,
            seq,
            payload,
        } = exchange;
        let Some(connection) = self
            .table
            .get_mut(id)
            .filter(|entry| entry.role() == Role::Server && entry.peer == peer)
        else {
            debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                connection = %id,
                "dropping QUERY for an unknown connection"
            );
            return;
        };
        match connection.check_query(seq) {
            QueryDisposition::Replay(cached) => {
                debug!(
                    target: DISPATCH_TARGET,
                    peer = %peer,
                    connection = %id,
                    seq,
                    "replaying cached response"
                );
                if let Err(error) = self.socket.send_to(peer, cached) {
                    warn!(
                        target: DISPATCH_TARGET,
                        peer = %peer,
                        error = %error,
                        "failed to replay response"
                    );
                }
            }
            QueryDisposition::Duplicate => debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                connection = %id,
                seq,
                "dropping duplicate QUERY"
            ),
            QueryDisposition::Novel => {
                let Some(service) = connection
                    .served_by()
                    .and_then(|service| self.services.get_mut(service))
                else {
                    return;
                };
                let queued = QueuedQuery {
                    endpoint: RpcEndpoint::new(peer, id, seq),
                    payload,
                };
                if service.enqueue(queued).is_ok() {
                    connection.accept_query(seq);
                } else {
                    debug!(
                        target: DISPATCH_TARGET,
                        peer = %peer,
                        service = %service.name,
                        seq,
                        "dropping QUERY: service queue full"
                    );
                }
            }
        }
    }

    fn on_response(&mut self, peer: Endpoint, exchange: Exchange) {
        let Some(connection) = self.table.find_client_mut(peer, exchange.connection) else {
            debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                remote = %exchange.connection,
                "dropping RESPONSE for an unknown connection"
            );
            return;
        };
        let id = connection.id;
        match connection.offer_response(exchange.seq, exchange.payload) {
            ResponseDisposition::Matched => trace!(
                target: DISPATCH_TARGET,
                connection = %id,
                seq = exchange.seq,
                "response matched"
            ),
            disposition => debug!(
                target: DISPATCH_TARGET,
                connection = %id,
                seq = exchange.seq,
                ?disposition,
                "dropping RESPONSE"
            ),
        }
    }

    fn on_disconnect(&mut self, peer: Endpoint, connection: ConnectionId) {
        let known = self
            .table
            .get(connection)
            .is_some_and(|entry| entry.role() == Role::Server && entry.peer == peer);
        if known {
            self.close_server_connection(connection);
        } else {
            debug!(
                target: DISPATCH_TARGET,
                peer = %peer,
                connection = %connection,
                "dropping DISCONNECT for an unknown connection"
            );
        }
    }

    /// Removes a server connection and whatever it still has queued.
    fn close_server_connection(&mut self, id: ConnectionId) {
        let Some(removed) = self.table.remove(id) else {
            return;
        };
        if let Some(service) = removed
            .served_by()
            .and_then(|service| self.services.get_mut(service))
        {
            service.detach(id);
        }
        debug!(
            target: DISPATCH_TARGET,
            peer = %removed.peer,
            connection = %id,
            "server connection closed"
        );
    }
}
