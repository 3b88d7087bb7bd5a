//! Service side: the registry of offered names and the worker operations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Condvar};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::Endpoint;
use crate::errors::{DispatchFailure, RpcError, UsageViolation};
use crate::table::{ConnectionId, Role};
use crate::wire::{encode_response, validate_payload, validate_service_name};

use super::{Rpc, wait, wait_until};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Identifier of an offered service; never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ServiceId(u32);

impl ServiceId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

/// Handle to a service returned by [`Rpc::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(ServiceId);

impl ServiceHandle {
    pub(crate) const fn id(self) -> ServiceId {
        self.0
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "service {}", self.0.0)
    }
}

/// Identity of the client behind a dequeued query.
///
/// Pass it back to [`Rpc::response`] to answer that exact exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RpcEndpoint {
    peer: Endpoint,
    connection: ConnectionId,
    seq: u64,
}

impl RpcEndpoint {
    pub(crate) const fn new(peer: Endpoint, connection: ConnectionId, seq: u64) -> Self {
        Self {
            peer,
            connection,
            seq,
        }
    }

    /// Address of the calling client.
    #[must_use]
    pub const fn peer(&self) -> Endpoint {
        self.peer
    }

    /// Server-side connection the query arrived on.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Sequence number of the query.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug)]
pub(crate) struct QueuedQuery {
    pub(crate) endpoint: RpcEndpoint,
    pub(crate) payload: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct Service {
    pub(crate) name: String,
    queue: VecDeque<QueuedQuery>,
    capacity: usize,
    connections: HashSet<ConnectionId>,
    pub(crate) wake: Arc<Condvar>,
}

impl Service {
    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues a query; returns it back when the queue is full.
    pub(crate) fn enqueue(&mut self, query: QueuedQuery) -> Result<(), QueuedQuery> {
        if self.queue.len() >= self.capacity {
            return Err(query);
        }
        self.queue.push_back(query);
        self.wake.notify_one();
        Ok(())
    }

    pub(crate) fn attach(&mut self, connection: ConnectionId) {
        self.connections.insert(connection);
    }

    /// Forgets a connection and drops its queued queries.
    pub(crate) fn detach(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        self.queue
            .retain(|queued| queued.endpoint.connection != connection);
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.connections.clear();
        self.wake.notify_all();
    }
}

/// Offered services by identifier and by name.
#[derive(Debug)]
pub(crate) struct ServiceRegistry {
    services: HashMap<ServiceId, Service>,
    names: HashMap<String, ServiceId>,
    next_id: u32,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            names: HashMap::new(),
            next_id: 1,
        }
    }
}

impl ServiceRegistry {
    pub(crate) fn id_for(&self, name: &str) -> Option<ServiceId> {
        self.names.get(name).copied()
    }

    pub(crate) fn get(&self, id: ServiceId) -> Option<&Service> {
        self.services.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
        self.services.get_mut(&id)
    }

    fn register(&mut self, name: &str, capacity: usize) -> Option<ServiceId> {
        if self.names.contains_key(name) {
            return None;
        }
        let id = ServiceId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.names.insert(name.to_owned(), id);
        self.services.insert(
            id,
            Service {
                name: name.to_owned(),
                queue: VecDeque::new(),
                capacity,
                connections: HashSet::new(),
                wake: Arc::new(Condvar::new()),
            },
        );
        Some(id)
    }

    fn remove(&mut self, id: ServiceId) -> Option<Service> {
        let service = self.services.remove(&id)?;
        self.names.remove(&service.name);
        Some(service)
    }

    /// Empties every queue and connection set, waking all workers.
    pub(crate) fn reset(&mut self) {
        self.services.values_mut().for_each(Service::reset);
    }
}

impl Rpc {
    /// Starts accepting connections for `name`.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the name is invalid or already offered; the
    /// existing service is left untouched.
    pub fn offer(&self, name: &str) -> Result<ServiceHandle, RpcError> {
        validate_service_name(name)?;
        let capacity = self.shared.settings().queue_capacity;
        let mut state = self.shared.lock()?;
        let id = state
            .services
            .register(name, capacity)
            .ok_or_else(|| UsageViolation::AlreadyOffered {
                name: name.to_owned(),
            })?;
        info!(
            target: SERVICE_TARGET,
            service = name,
            capacity,
            "service offered"
        );
        Ok(ServiceHandle(id))
    }

    /// Stops offering a service.
    ///
    /// Its queue and every connection routed to it are discarded, and workers
    /// blocked in [`Rpc::query`] fail. Later CONNECTs for the name are dropped
    /// until it is offered again.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the service is not offered.
    pub fn withdraw(&self, service: ServiceHandle) -> Result<(), RpcError> {
        let mut state = self.shared.lock()?;
        let removed = state
            .services
            .remove(service.0)
            .ok_or(UsageViolation::StaleService { service })?;
        let closed = state.table.remove_served_by(service.0).len();
        removed.wake.notify_all();
        info!(
            target: SERVICE_TARGET,
            service = %removed.name,
            closed,
            discarded = removed.queue.len(),
            "service withdrawn"
        );
        Ok(())
    }

    /// Blocks until a query is available for `service` and copies it into
    /// `buffer`.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the query is longer than `buffer`; the query
    /// stays at the head of the queue. Returns a dispatch error when the
    /// service is withdrawn or the engine is reinitialised.
    pub fn query(
        &self,
        service: ServiceHandle,
        buffer: &mut [u8],
    ) -> Result<(RpcEndpoint, usize), RpcError> {
        loop {
            if let Some(found) = self.take_query(service, buffer, None)? {
                return Ok(found);
            }
        }
    }

    /// Like [`Rpc::query`] but gives up after `timeout`, returning `None`.
    ///
    /// # Errors
    ///
    /// Fails for the same reasons as [`Rpc::query`].
    pub fn query_timeout(
        &self,
        service: ServiceHandle,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(RpcEndpoint, usize)>, RpcError> {
        self.take_query(service, buffer, Some(Instant::now() + timeout))
    }

    fn take_query(
        &self,
        service: ServiceHandle,
        buffer: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<Option<(RpcEndpoint, usize)>, RpcError> {
        let mut state = self.shared.lock()?;
        let epoch = state.epoch;
        let wake = state
            .services
            .get(service.0)
            .map(|entry| Arc::clone(&entry.wake))
            .ok_or(DispatchFailure::Withdrawn)?;
        loop {
            if state.epoch != epoch {
                return Err(DispatchFailure::Reset.into());
            }
            let entry = state
                .services
                .get_mut(service.0)
                .ok_or(DispatchFailure::Withdrawn)?;
            if let Some(queued) = entry.queue.pop_front() {
                let needed = queued.payload.len();
                let capacity = buffer.len();
                let Some(target) = buffer.get_mut(..needed) else {
                    entry.queue.push_front(queued);
                    return Err(UsageViolation::BufferTooSmall { needed, capacity }.into());
                };
                target.copy_from_slice(&queued.payload);
                debug!(
                    target: SERVICE_TARGET,
                    service = %entry.name,
                    peer = %queued.endpoint.peer,
                    connection = %queued.endpoint.connection,
                    seq = queued.endpoint.seq,
                    "query dequeued"
                );
                return Ok(Some((queued.endpoint, needed)));
            }
            state = match deadline {
                None => wait(&wake, state)?,
                Some(deadline) if Instant::now() < deadline => {
                    wait_until(&wake, state, deadline)?
                }
                Some(_) => return Ok(None),
            };
        }
    }

    /// Answers the query identified by `endpoint` with the first `len` bytes
    /// of `payload`.
    ///
    /// The datagram is kept as the connection's cached response so a
    /// retransmitted QUERY can be answered without the worker.
    ///
    /// # Errors
    ///
    /// Returns a usage error when `len` exceeds `payload` or the wire maximum,
    /// and a dispatch error when the service or connection no longer exists or
    /// the send fails.
    pub fn response(
        &self,
        service: ServiceHandle,
        endpoint: &RpcEndpoint,
        payload: &[u8],
        len: usize,
    ) -> Result<(), RpcError> {
        let body = payload
            .get(..len)
            .ok_or(UsageViolation::LengthExceedsCapacity {
                len,
                capacity: payload.len(),
            })?;
        validate_payload(body)?;
        let mut guard = self.shared.lock()?;
        let state = &mut *guard;
        if state.services.get(service.0).is_none() {
            return Err(DispatchFailure::Withdrawn.into());
        }
        let gone = DispatchFailure::ConnectionGone {
            connection: endpoint.connection,
        };
        let Some(connection) = state.table.get_mut(endpoint.connection) else {
            return Err(gone.into());
        };
        if connection.role() != Role::Server
            || connection.served_by() != Some(service.0)
            || connection.peer != endpoint.peer
        {
            return Err(gone.into());
        }
        let datagram = encode_response(endpoint.connection, endpoint.seq, body)?;
        state
            .socket
            .send_to(endpoint.peer, &datagram)
            .map_err(DispatchFailure::Send)?;
        connection.cache_response(endpoint.seq, datagram);
        debug!(
            target: SERVICE_TARGET,
            peer = %endpoint.peer,
            connection = %endpoint.connection,
            seq = endpoint.seq,
            len,
            "response sent"
        );
        Ok(())
    }
}
