//! Peer addressing.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Immutable `(address, port)` pair identifying a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Builds an endpoint from an address and port.
    #[must_use]
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    /// IP address of the peer.
    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    /// UDP port of the peer.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.0.port()
    }

    /// The endpoint as a standard socket address.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Replaces an unspecified address with the loopback of the same family.
    ///
    /// A socket bound to `0.0.0.0` reports that address locally, which is not
    /// something a peer can send to.
    #[must_use]
    pub fn routable(self) -> Self {
        match self.0.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                Self::new(IpAddr::V6(Ipv6Addr::LOCALHOST), self.port())
            }
            _ => self,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}
