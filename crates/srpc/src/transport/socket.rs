//! UDP socket wrapper used by the engine.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::Endpoint;

use super::{TRANSPORT_TARGET, TransportError};

/// A bound UDP socket with a read timeout.
#[derive(Debug)]
pub(crate) struct DatagramSocket {
    socket: UdpSocket,
    local: Endpoint,
}

impl DatagramSocket {
    /// Binds `host:port`; a zero port asks the kernel for an ephemeral one.
    pub(crate) fn bind(
        host: &str,
        port: u16,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr = lookup(host, port)?.into_iter().next().ok_or_else(|| {
            TransportError::ResolveEmpty {
                host: host.to_owned(),
                port,
            }
        })?;
        let socket =
            UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        socket
            .set_read_timeout(Some(read_timeout))
            .map_err(|source| TransportError::ReadTimeout { source })?;
        let local = socket
            .local_addr()
            .map_err(|source| TransportError::LocalAddr { source })?;
        info!(
            target: TRANSPORT_TARGET,
            local = %local,
            "datagram socket bound"
        );
        Ok(Self {
            socket,
            local: Endpoint::from(local),
        })
    }

    /// Address and port peers should use to reach this socket.
    pub(crate) fn local_endpoint(&self) -> Endpoint {
        self.local.routable()
    }

    /// Address the socket is actually bound to.
    pub(crate) fn bound_endpoint(&self) -> Endpoint {
        self.local
    }

    /// Hands one datagram to the kernel. Delivery is not confirmed.
    pub(crate) fn send_to(&self, peer: Endpoint, datagram: &[u8]) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(datagram, peer.socket_addr())
            .map_err(|source| TransportError::Send { peer, source })?;
        if sent != datagram.len() {
            return Err(TransportError::ShortSend {
                peer,
                sent,
                len: datagram.len(),
            });
        }
        Ok(())
    }

    /// Waits up to the read timeout for one datagram.
    ///
    /// Returns `Ok(None)` when the timeout elapses or the read is interrupted.
    pub(crate) fn receive(&self, buf: &mut [u8]) -> io::Result<Option<(Endpoint, usize)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((Endpoint::from(from), len))),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

impl Drop for DatagramSocket {
    fn drop(&mut self) {
        debug!(
            target: TRANSPORT_TARGET,
            local = %self.local,
            "datagram socket closed"
        );
    }
}

/// Candidate addresses for `host:port`, in resolver order.
///
/// May block on a name lookup, so callers must not hold the engine lock.
pub(crate) fn lookup(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::ResolveEmpty {
            host: host.to_owned(),
            port,
        });
    }
    Ok(addrs)
}

/// Picks the candidate of the same family as `local`, else the first one.
pub(crate) fn prefer_family(candidates: &[SocketAddr], local: Endpoint) -> Option<SocketAddr> {
    let ipv4 = local.socket_addr().is_ipv4();
    candidates
        .iter()
        .find(|addr| addr.is_ipv4() == ipv4)
        .or_else(|| candidates.first())
        .copied()
}
