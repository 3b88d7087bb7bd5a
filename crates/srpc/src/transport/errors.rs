//! Error types for datagram socket operations.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::Endpoint;

/// Errors surfaced while binding or using the datagram socket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Host name resolution failed.
    #[error("failed to resolve UDP address {host}:{port}: {source}")]
    Resolve {
        /// Host that was looked up.
        host: String,
        /// Port that was requested.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution produced no usable address.
    #[error("no UDP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host that was looked up.
        host: String,
        /// Port that was requested.
        port: u16,
    },
    /// The port is unavailable or the address is not local.
    #[error("failed to bind UDP socket at {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The read timeout could not be installed.
    #[error("failed to configure socket read timeout: {source}")]
    ReadTimeout {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bound address could not be read back.
    #[error("failed to read local socket address: {source}")]
    LocalAddr {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A datagram could not be handed to the kernel.
    #[error("failed to send datagram to {peer}: {source}")]
    Send {
        /// Destination of the datagram.
        peer: Endpoint,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The kernel accepted only part of a datagram.
    #[error("short send to {peer}: {sent} of {len} bytes")]
    ShortSend {
        /// Destination of the datagram.
        peer: Endpoint,
        /// Bytes the kernel accepted.
        sent: usize,
        /// Bytes in the datagram.
        len: usize,
    },
}
