//! Error types surfaced by the engine.
//!
//! Every failure is an [`RpcError`]. The top-level variant names the group a
//! failure belongs to ([`ErrorCategory`]); the reason enums carry the detail
//! and any underlying transport or wire error.

use std::fmt;

use srpc_config::ConfigError;
use thiserror::Error;

use crate::engine::{ConnectionHandle, ServiceHandle};
use crate::table::ConnectionId;
use crate::transport::TransportError;
use crate::wire::WireError;

/// Group an [`RpcError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The transport could not be brought up.
    Init,
    /// A connection could not be established.
    Handshake,
    /// A call did not complete.
    Call,
    /// A service-side operation did not complete.
    Dispatch,
    /// The API was misused; nothing was sent.
    Usage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Handshake => "handshake",
            Self::Call => "call",
            Self::Dispatch => "dispatch",
            Self::Usage => "usage",
        };
        formatter.write_str(label)
    }
}

/// Errors returned by [`crate::Rpc`] operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The engine could not start or rebind.
    #[error("engine initialisation failed: {0}")]
    Init(#[source] InitFailure),
    /// Establishing a connection to `service` failed.
    #[error("handshake for service '{service}' failed: {reason}")]
    Handshake {
        /// Service the client tried to reach.
        service: String,
        /// What went wrong.
        #[source]
        reason: HandshakeFailure,
    },
    /// A call on `connection` failed.
    #[error("call on {connection} failed: {reason}")]
    Call {
        /// Connection the call was issued on.
        connection: ConnectionHandle,
        /// What went wrong.
        #[source]
        reason: CallFailure,
    },
    /// A service-side operation failed.
    #[error("dispatch failed: {0}")]
    Dispatch(#[source] DispatchFailure),
    /// The request was rejected before any traffic was sent.
    #[error("invalid use: {0}")]
    Usage(#[source] UsageViolation),
}

impl RpcError {
    /// Group this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Init(_) => ErrorCategory::Init,
            Self::Handshake { .. } => ErrorCategory::Handshake,
            Self::Call { .. } => ErrorCategory::Call,
            Self::Dispatch(_) => ErrorCategory::Dispatch,
            Self::Usage(_) => ErrorCategory::Usage,
        }
    }

    pub(crate) fn handshake(service: &str, reason: HandshakeFailure) -> Self {
        Self::Handshake {
            service: service.to_owned(),
            reason,
        }
    }

    pub(crate) const fn call(connection: ConnectionHandle, reason: CallFailure) -> Self {
        Self::Call { connection, reason }
    }

    pub(crate) const fn poisoned() -> Self {
        Self::Dispatch(DispatchFailure::Poisoned)
    }
}

impl From<InitFailure> for RpcError {
    fn from(failure: InitFailure) -> Self {
        Self::Init(failure)
    }
}

impl From<DispatchFailure> for RpcError {
    fn from(failure: DispatchFailure) -> Self {
        Self::Dispatch(failure)
    }
}

impl From<UsageViolation> for RpcError {
    fn from(violation: UsageViolation) -> Self {
        Self::Usage(violation)
    }
}

impl From<WireError> for RpcError {
    fn from(error: WireError) -> Self {
        Self::Usage(UsageViolation::Wire(error))
    }
}

/// Reasons the engine could not start or rebind.
#[derive(Debug, Error)]
pub enum InitFailure {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The socket could not be bound.
    #[error(transparent)]
    Bind(#[from] TransportError),
    /// The receiver thread could not be spawned.
    #[error("failed to spawn receiver thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Reasons a handshake failed.
#[derive(Debug, Error)]
pub enum HandshakeFailure {
    /// The target host did not resolve.
    #[error(transparent)]
    Resolve(TransportError),
    /// A CONNECT could not be sent.
    #[error(transparent)]
    Send(TransportError),
    /// No CONNECT_ACK arrived within the retry budget.
    #[error("no acknowledgement after {attempts} attempts")]
    Exhausted {
        /// CONNECT transmissions made.
        attempts: u32,
    },
    /// The engine was reinitialised while waiting.
    #[error("transport was reset")]
    Reset,
}

/// Reasons a call failed.
#[derive(Debug, Error)]
pub enum CallFailure {
    /// No matching RESPONSE arrived within the retry budget.
    #[error("no response after {attempts} attempts")]
    Exhausted {
        /// QUERY transmissions made.
        attempts: u32,
    },
    /// The response did not fit the caller's buffer, which was left untouched.
    #[error("response of {needed} bytes exceeds the {capacity} byte buffer")]
    ResponseTooLarge {
        /// Length of the response payload.
        needed: usize,
        /// Capacity of the caller's buffer.
        capacity: usize,
    },
    /// The connection was disconnected while waiting.
    #[error("connection was closed")]
    Closed,
    /// The engine was reinitialised while waiting.
    #[error("transport was reset")]
    Reset,
    /// A QUERY could not be sent.
    #[error(transparent)]
    Send(TransportError),
}

/// Reasons a service-side operation failed.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    /// The service was withdrawn.
    #[error("service was withdrawn")]
    Withdrawn,
    /// The engine was reinitialised while waiting.
    #[error("transport was reset")]
    Reset,
    /// The connection the response belongs to no longer exists.
    #[error("connection {connection} no longer exists")]
    ConnectionGone {
        /// Server-side connection named by the endpoint.
        connection: ConnectionId,
    },
    /// A RESPONSE could not be sent.
    #[error(transparent)]
    Send(TransportError),
    /// A thread panicked while holding the engine lock.
    #[error("engine lock poisoned")]
    Poisoned,
}

/// Requests rejected synchronously without sending anything.
#[derive(Debug, Error)]
pub enum UsageViolation {
    /// A call is already outstanding on the connection.
    #[error("a call is already outstanding on {connection}")]
    CallOutstanding {
        /// Connection the second call was issued on.
        connection: ConnectionHandle,
    },
    /// The declared length exceeds the buffer it describes.
    #[error("declared length {len} exceeds buffer capacity {capacity}")]
    LengthExceedsCapacity {
        /// Declared length.
        len: usize,
        /// Capacity of the buffer.
        capacity: usize,
    },
    /// A queued query does not fit the worker's buffer; it stays queued.
    #[error("query of {needed} bytes does not fit a {capacity} byte buffer")]
    BufferTooSmall {
        /// Length of the queued payload.
        needed: usize,
        /// Capacity of the worker's buffer.
        capacity: usize,
    },
    /// The name is already offered by a live service.
    #[error("service '{name}' is already offered")]
    AlreadyOffered {
        /// Name that was offered twice.
        name: String,
    },
    /// The connection handle does not name a live client connection.
    #[error("{connection} is not open")]
    StaleConnection {
        /// Handle that was used.
        connection: ConnectionHandle,
    },
    /// The service handle does not name an offered service.
    #[error("{service} is not offered")]
    StaleService {
        /// Handle that was used.
        service: ServiceHandle,
    },
    /// A payload or service name does not fit the wire format.
    #[error(transparent)]
    Wire(#[from] WireError),
}
