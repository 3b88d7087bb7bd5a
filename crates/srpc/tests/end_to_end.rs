//! End-to-end checks against the public engine API over loopback UDP.

use std::collections::HashSet;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rstest::rstest;
use srpc::wire::{self, MAX_DATAGRAM_SIZE, Message};
use srpc::{DispatchFailure, ErrorCategory, Rpc, RpcError, ServiceHandle};
use srpc_config::Config;

fn fast_config() -> Config {
    Config {
        bind_host: "127.0.0.1".to_owned(),
        port: 0,
        connect_attempts: 3,
        connect_timeout_ms: 150,
        call_attempts: 5,
        call_timeout_ms: 150,
        poll_interval_ms: 10,
        ..Config::default()
    }
}

/// Prefers the conventional port and falls back to an ephemeral one when it
/// is taken on the test host.
fn bind_conventional() -> Rpc {
    Rpc::with_config(&fast_config().with_port(9000))
        .or_else(|_| Rpc::with_config(&fast_config()))
        .expect("server engine")
}

/// Echo workers that also log every payload they handle.
fn spawn_workers(
    engine: &Arc<Rpc>,
    service: ServiceHandle,
    count: usize,
    seen: &Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let engine = Arc::clone(engine);
            let seen = Arc::clone(seen);
            thread::spawn(move || {
                let mut buffer = vec![0_u8; 1024];
                loop {
                    let (endpoint, len) = match engine.query(service, &mut buffer) {
                        Ok(found) => found,
                        Err(RpcError::Dispatch(DispatchFailure::Reset)) => continue,
                        Err(_) => break,
                    };
                    seen.lock()
                        .expect("seen mutex")
                        .push((worker, buffer[..len].to_vec()));
                    thread::sleep(Duration::from_millis(20));
                    if engine.response(service, &endpoint, &buffer, len).is_err() {
                        break;
                    }
                }
            })
        })
        .collect()
}

struct EchoServer {
    engine: Arc<Rpc>,
    service: ServiceHandle,
    seen: Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
    workers: Vec<JoinHandle<()>>,
}

impl EchoServer {
    fn start(workers: usize) -> Self {
        Self::serve(Rpc::with_config(&fast_config()).expect("server engine"), workers)
    }

    fn serve(engine: Rpc, workers: usize) -> Self {
        let engine = Arc::new(engine);
        let service = engine.offer("echo").expect("offer echo");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let workers = spawn_workers(&engine, service, workers, &seen);
        Self {
            engine,
            service,
            seen,
            workers,
        }
    }

    fn port(&self) -> u16 {
        self.engine.local_endpoint().expect("server endpoint").port()
    }

    fn seen(&self) -> Vec<(usize, Vec<u8>)> {
        self.seen.lock().expect("seen mutex").clone()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        drop(self.engine.withdraw(self.service));
        for worker in self.workers.drain(..) {
            drop(worker.join());
        }
    }
}

#[rstest]
fn echo_round_trip_advances_sequence() {
    let server = EchoServer::serve(bind_conventional(), 1);
    let client = Rpc::with_config(&fast_config()).expect("client engine");
    let connection = client
        .connect("127.0.0.1", server.port(), "echo", 1)
        .expect("connect");

    let mut reply = [0_u8; 256];
    let len = client
        .call(connection, b"hello", 5, &mut reply)
        .expect("first call");
    assert_eq!(&reply[..len], b"hello");
    let len = client
        .call(connection, b"again", 5, &mut reply)
        .expect("second call");
    assert_eq!(&reply[..len], b"again");

    let info = client.connection_info(connection).expect("connection info");
    assert_eq!(info.seq, 3);
    client.disconnect(connection).expect("disconnect");
}

#[rstest]
fn unknown_service_handshake_fails() {
    let server = EchoServer::start(1);
    let client = Rpc::with_config(&fast_config()).expect("client engine");
    let error = client
        .connect("127.0.0.1", server.port(), "nobody", 1)
        .expect_err("handshake should fail");
    assert_eq!(error.category(), ErrorCategory::Handshake);
    assert_eq!(client.connection_count().expect("count"), 0);
}

#[rstest]
fn duplicated_query_reaches_one_worker_once() {
    let server = EchoServer::start(2);
    let socket = UdpSocket::bind("127.0.0.1:0").expect("raw socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("read timeout");
    let target = ("127.0.0.1", server.port());
    let mut buffer = vec![0_u8; MAX_DATAGRAM_SIZE];

    let connect = wire::encode_connect(77, 10, "echo").expect("encode CONNECT");
    socket.send_to(&connect, target).expect("send CONNECT");
    let (len, _) = socket.recv_from(&mut buffer).expect("CONNECT_ACK");
    let Ok(Message::ConnectAck { connection, .. }) = Message::decode(&buffer[..len]) else {
        panic!("expected CONNECT_ACK");
    };

    let query = wire::encode_query(connection, 10, b"once").expect("encode QUERY");
    socket.send_to(&query, target).expect("send QUERY");
    socket.send_to(&query, target).expect("resend QUERY");

    let (len, _) = socket.recv_from(&mut buffer).expect("RESPONSE");
    let first = buffer[..len].to_vec();
    match Message::decode(&first) {
        Ok(Message::Response(exchange)) => {
            assert_eq!(exchange.seq, 10);
            assert_eq!(exchange.payload, b"once");
        }
        other => panic!("expected RESPONSE, got {other:?}"),
    }

    socket.send_to(&query, target).expect("retransmit QUERY");
    let (len, _) = socket.recv_from(&mut buffer).expect("replayed RESPONSE");
    assert_eq!(&buffer[..len], first.as_slice());

    thread::sleep(Duration::from_millis(100));
    let handled = server.seen();
    assert_eq!(handled.len(), 1, "handled: {handled:?}");
}

#[rstest]
fn concurrent_clients_are_spread_over_workers() {
    let server = EchoServer::start(2);
    let port = server.port();
    let callers: Vec<_> = (0..4)
        .map(|index| {
            thread::spawn(move || {
                let client = Rpc::with_config(&fast_config()).expect("client engine");
                let connection = client
                    .connect("127.0.0.1", port, "echo", 1)
                    .expect("connect");
                let payload = format!("client {index}");
                let mut reply = [0_u8; 64];
                let len = client
                    .call(connection, payload.as_bytes(), payload.len(), &mut reply)
                    .expect("call");
                assert_eq!(&reply[..len], payload.as_bytes());
            })
        })
        .collect();
    for caller in callers {
        caller.join().expect("caller thread");
    }

    let handled = server.seen();
    let payloads: HashSet<_> = handled.iter().map(|(_, payload)| payload.clone()).collect();
    assert_eq!(handled.len(), 4, "each query is dequeued once: {handled:?}");
    assert_eq!(payloads.len(), 4);
}

#[rstest]
fn reinit_moves_a_server_to_a_new_port() {
    let server = EchoServer::start(1);
    let old = server.port();
    let new = server.engine.reinit(0).expect("reinit").port();
    assert_ne!(old, new);

    let client = Rpc::with_config(&fast_config()).expect("client engine");
    let error = client
        .connect("127.0.0.1", old, "echo", 1)
        .expect_err("old port is closed");
    assert_eq!(error.category(), ErrorCategory::Handshake);

    let connection = client
        .connect("127.0.0.1", new, "echo", 1)
        .expect("connect to new port");
    let mut reply = [0_u8; 16];
    let len = client
        .call(connection, b"moved", 5, &mut reply)
        .expect("call after reinit");
    assert_eq!(&reply[..len], b"moved");
}

#[rstest]
fn worker_reply_length_is_independent_of_the_query() {
    let server = Arc::new(bind_conventional());
    let service = server.offer("db").expect("offer db");
    let worker = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            let mut buffer = [0_u8; 64];
            let (endpoint, len) = server.query(service, &mut buffer).expect("query");
            assert_eq!(&buffer[..len], b"ping");
            server
                .response(service, &endpoint, b"pingpong", 8)
                .expect("response");
        })
    };

    let client = Rpc::init(0).expect("client engine");
    let port = server.local_endpoint().expect("server endpoint").port();
    let connection = client
        .connect("127.0.0.1", port, "db", 1)
        .expect("connect");
    let mut reply = [0_u8; 64];
    let len = client
        .call(connection, b"ping", 4, &mut reply)
        .expect("call");
    assert_eq!(len, 8);
    assert_eq!(&reply[..len], b"pingpong");
    worker.join().expect("worker thread");
}
