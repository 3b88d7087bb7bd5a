//! BDD test worlds: a server engine, a client engine and a raw peer.

use std::cell::RefCell;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::engine::{ConnectionHandle, Rpc, ServiceHandle};
use crate::errors::RpcError;
use crate::health::HealthReporter;
use crate::process::EchoWorkers;
use crate::table::{ConnectionId, ConnectionInfo};
use crate::Endpoint;

use super::config_loader::{FailingConfigLoader, InvalidConfigLoader, TestConfigLoader, fast_config};
use super::peer::RawPeer;
use super::reporter::RecordingHealthReporter;

/// Time a dropped world gives its echo workers to stop.
const WORKER_STOP_BUDGET: Duration = Duration::from_secs(2);

/// Fill byte of the reply buffer before a call.
pub const UNTOUCHED: u8 = 0xAA;

/// Scenario world shared across engine BDD steps.
pub struct EngineWorld {
    pub server: Arc<Rpc>,
    pub client: Rpc,
    pub peer: RawPeer,
    pub reporter: Arc<RecordingHealthReporter>,
    pub service: Option<ServiceHandle>,
    pub connection: Option<ConnectionHandle>,
    pub peer_connection: Option<ConnectionId>,
    pub handshake: Option<Result<ConnectionHandle, RpcError>>,
    pub call: Option<Result<usize, RpcError>>,
    pub reply: Vec<u8>,
    pub offer: Option<Result<ServiceHandle, RpcError>>,
    pub reinit: Option<Result<Endpoint, RpcError>>,
    pub previous_server: Option<Endpoint>,
    pub snapshot: Vec<ConnectionInfo>,
    pub acks: Vec<ConnectionId>,
    pub responses: Vec<Vec<u8>>,
    pub blocked: Option<Receiver<Result<(), RpcError>>>,
    workers: Option<EchoWorkers>,
}

impl EngineWorld {
    #[must_use]
    pub fn new() -> Self {
        let config = fast_config();
        Self {
            server: Arc::new(Rpc::with_config(&config).expect("start server engine")),
            client: Rpc::with_config(&config).expect("start client engine"),
            peer: RawPeer::bind(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            service: None,
            connection: None,
            peer_connection: None,
            handshake: None,
            call: None,
            reply: Vec::new(),
            offer: None,
            reinit: None,
            previous_server: None,
            snapshot: Vec::new(),
            acks: Vec::new(),
            responses: Vec::new(),
            blocked: None,
            workers: None,
        }
    }

    #[must_use]
    pub fn server_endpoint(&self) -> Endpoint {
        self.server.local_endpoint().expect("server endpoint")
    }

    #[must_use]
    pub fn service(&self) -> ServiceHandle {
        self.service.expect("service offered")
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionHandle {
        self.connection.expect("client connected")
    }

    pub fn offer(&mut self, name: &str) {
        self.service = Some(self.server.offer(name).expect("offer service"));
    }

    pub fn start_echo_workers(&mut self, count: usize) {
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        self.workers = Some(
            EchoWorkers::spawn(&self.server, self.service(), count, &reporter)
                .expect("spawn echo workers"),
        );
    }

    pub fn connect(&mut self, service: &str, seq: u64) {
        let port = self.server_endpoint().port();
        let result = self.client.connect("127.0.0.1", port, service, seq);
        if let Ok(handle) = &result {
            self.connection = Some(*handle);
        }
        self.handshake = Some(result);
    }

    pub fn call(&mut self, payload: &str, capacity: usize) {
        let connection = self.connection();
        let mut reply = vec![UNTOUCHED; capacity];
        let result = self
            .client
            .call(connection, payload.as_bytes(), payload.len(), &mut reply);
        self.reply = reply;
        self.call = Some(result);
    }

    /// Starts a thread blocked in `query`; its outcome arrives on a channel.
    pub fn block_worker(&mut self) {
        let (sender, receiver) = mpsc::channel();
        let server = Arc::clone(&self.server);
        let service = self.service();
        thread::spawn(move || {
            let mut buffer = [0_u8; 64];
            let outcome = server.query(service, &mut buffer).map(|_| ());
            let _ = sender.send(outcome);
        });
        thread::sleep(Duration::from_millis(50));
        self.blocked = Some(receiver);
    }

    pub fn withdraw(&mut self) {
        if let Some(service) = self.service.take() {
            self.server.withdraw(service).expect("withdraw service");
        }
    }

    #[must_use]
    pub fn client_seq(&self) -> u64 {
        self.client
            .connection_info(self.connection())
            .expect("connection info")
            .seq
    }
}

impl Default for EngineWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EngineWorld {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            let _ = self.server.withdraw(service);
        }
        if let Some(workers) = self.workers.take() {
            let _ = workers.join_within(WORKER_STOP_BUDGET);
        }
    }
}

/// Default engine world fixture.
#[must_use]
pub fn engine_world() -> RefCell<EngineWorld> {
    RefCell::new(EngineWorld::new())
}

/// Scenario world for the daemon bootstrap sequence.
pub struct BootstrapWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
}

impl BootstrapWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
        }
    }

    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader);
    }

    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
    }

    pub fn use_invalid_loader(&mut self) {
        self.loader = Box::new(InvalidConfigLoader);
    }

    pub fn bootstrap(&mut self) {
        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    #[must_use]
    pub fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }

    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }
}

impl Default for BootstrapWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Default bootstrap world fixture.
#[must_use]
pub fn bootstrap_world() -> RefCell<BootstrapWorld> {
    RefCell::new(BootstrapWorld::new())
}
