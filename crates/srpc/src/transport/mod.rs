//! Datagram transport owned by the engine.
//!
//! The transport binds a single UDP socket and exposes best-effort sends and
//! receives bounded by a read timeout, so the receiver thread can notice
//! shutdown and socket swaps between reads.

mod errors;
mod socket;

pub use self::errors::TransportError;
pub(crate) use self::socket::{DatagramSocket, lookup, prefer_family};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
