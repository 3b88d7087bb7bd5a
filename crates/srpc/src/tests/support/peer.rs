//! A bare UDP socket speaking the wire format by hand.
//!
//! Lets tests inject retransmissions, duplicates and stale datagrams that the
//! engine itself would never produce.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::Endpoint;
use crate::table::ConnectionId;
use crate::wire::{self, Exchange, MAX_DATAGRAM_SIZE, Message};

/// Raw datagram peer bound to an ephemeral loopback port.
#[derive(Debug)]
pub struct RawPeer {
    socket: UdpSocket,
}

impl RawPeer {
    #[must_use]
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind raw peer");
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("set raw peer timeout");
        Self { socket }
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.socket.local_addr().expect("raw peer address"))
    }

    pub fn send(&self, to: Endpoint, datagram: &[u8]) {
        self.socket
            .send_to(datagram, to.socket_addr())
            .expect("raw peer send");
    }

    /// Next decodable datagram received within `limit`, with its sender.
    #[must_use]
    pub fn receive_within(&self, limit: Duration) -> Option<(Endpoint, Vec<u8>)> {
        let deadline = Instant::now() + limit;
        let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
        while Instant::now() < deadline {
            if let Ok((len, from)) = self.socket.recv_from(&mut buf) {
                return Some((Endpoint::from(from), buf[..len].to_vec()));
            }
        }
        None
    }

    /// Next decoded message received within `limit`.
    #[must_use]
    pub fn message_within(&self, limit: Duration) -> Option<Message> {
        self.receive_within(limit)
            .map(|(_, datagram)| Message::decode(&datagram).expect("decode datagram"))
    }

    /// Sends one CONNECT and returns the acknowledged connection id.
    #[must_use]
    pub fn handshake(&self, server: Endpoint, nonce: u32, seq: u64, service: &str) -> ConnectionId {
        let datagram = wire::encode_connect(nonce, seq, service).expect("encode CONNECT");
        self.send(server, &datagram);
        match self.message_within(Duration::from_secs(2)) {
            Some(Message::ConnectAck {
                nonce: acked,
                seq: acked_seq,
                connection,
            }) => {
                assert_eq!((acked, acked_seq), (nonce, seq), "ack echoes the CONNECT");
                connection
            }
            other => panic!("expected CONNECT_ACK, got {other:?}"),
        }
    }

    pub fn query(&self, server: Endpoint, connection: ConnectionId, seq: u64, payload: &[u8]) {
        let datagram = wire::encode_query(connection, seq, payload).expect("encode QUERY");
        self.send(server, &datagram);
    }

    /// Waits for a RESPONSE and returns its raw bytes.
    #[must_use]
    pub fn response_within(&self, limit: Duration) -> Option<Vec<u8>> {
        let (_, datagram) = self.receive_within(limit)?;
        match Message::decode(&datagram) {
            Ok(Message::Response(Exchange { .. })) => Some(datagram),
            other => panic!("expected RESPONSE, got {other:?}"),
        }
    }
}
