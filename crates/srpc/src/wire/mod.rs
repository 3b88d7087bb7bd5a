//! Datagram framing for the handshake and call exchanges.
//!
//! Every datagram starts with a four byte header followed by a kind-specific
//! body. All integers are big-endian.
//!
//! ```text
//! header      [magic:2 = 0x5352][version:1][kind:1]
//! CONNECT     [nonce:4][seq:8][name_len:1][name:name_len]
//! CONNECT_ACK [nonce:4][seq:8][connection:4]
//! QUERY       [connection:4][seq:8][len:2][payload:len]
//! RESPONSE    [connection:4][seq:8][len:2][payload:len]
//! DISCONNECT  [connection:4]
//! ```
//!
//! A datagram carries exactly one message; trailing bytes are rejected.

use thiserror::Error;

use srpc_config::MAX_SERVICE_NAME_BYTES;

use crate::table::ConnectionId;


/// Leading bytes of every datagram ("SR").
pub const MAGIC: u16 = 0x5352;

/// Protocol revision written into every header.
pub const VERSION: u8 = 1;

/// Magic, version and kind.
pub const HEADER_SIZE: usize = 4;

/// Framing bytes preceding a QUERY or RESPONSE payload.
pub const EXCHANGE_OVERHEAD: usize = HEADER_SIZE + 4 + 8 + 2;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest query or response payload.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - EXCHANGE_OVERHEAD;

/// Errors raised while encoding or decoding datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The datagram ended before a field could be read.
    #[error("truncated datagram: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required to read the next field.
        needed: usize,
        /// Bytes available.
        have: usize,
    },
    /// The datagram does not start with [`MAGIC`].
    #[error("bad magic {found:#06x}")]
    BadMagic {
        /// Value found in the header.
        found: u16,
    },
    /// The header names a protocol revision this build does not speak.
    #[error("unsupported protocol version {found}")]
    UnsupportedVersion {
        /// Version found in the header.
        found: u8,
    },
    /// The header names an unknown message kind.
    #[error("unknown message kind {found}")]
    UnknownKind {
        /// Kind byte found in the header.
        found: u8,
    },
    /// Bytes remain after the message body.
    #[error("{extra} trailing bytes after message")]
    TrailingBytes {
        /// Number of unread bytes.
        extra: usize,
    },
    /// A payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload of {size} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit")]
    PayloadTooLarge {
        /// Offending payload length.
        size: usize,
    },
    /// A service name is empty or longer than the wire allows.
    #[error("service name of {size} bytes must be between 1 and {MAX_SERVICE_NAME_BYTES} bytes")]
    ServiceNameLength {
        /// Offending name length.
        size: usize,
    },
    /// A service name is not valid UTF-8.
    #[error("service name is not valid UTF-8")]
    ServiceNameEncoding,
}

/// Message kind tag carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Handshake request.
    Connect = 1,
    /// Handshake acceptance.
    ConnectAck = 2,
    /// Call request.
    Query = 3,
    /// Call reply.
    Response = 4,
    /// Best-effort teardown notice.
    Disconnect = 5,
}

impl MessageKind {
    fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnectAck),
            3 => Ok(Self::Query),
            4 => Ok(Self::Response),
            5 => Ok(Self::Disconnect),
            found => Err(WireError::UnknownKind { found }),
        }
    }
}

/// Body shared by QUERY and RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Server-side connection the exchange belongs to.
    pub connection: ConnectionId,
    /// Sequence number of the exchange.
    pub seq: u64,
    /// Opaque application bytes.
    pub payload: Vec<u8>,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Request to open a connection to `service`.
    Connect {
        /// Distinguishes concurrent handshakes from one socket.
        nonce: u32,
        /// First sequence number the client will use.
        seq: u64,
        /// Name of the targeted service.
        service: String,
    },
    /// Acceptance of a CONNECT, echoing its nonce and sequence.
    ConnectAck {
        /// Nonce of the accepted CONNECT.
        nonce: u32,
        /// Sequence of the accepted CONNECT.
        seq: u64,
        /// Identifier the server assigned to the connection.
        connection: ConnectionId,
    },
    /// Call request.
    Query(Exchange),
    /// Call reply.
    Response(Exchange),
    /// The client dropped the connection.
    Disconnect {
        /// Server-side connection being dropped.
        connection: ConnectionId,
    },
}

impl Message {
    /// Kind tag of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Connect { .. } => MessageKind::Connect,
            Self::ConnectAck { .. } => MessageKind::ConnectAck,
            Self::Query(_) => MessageKind::Query,
            Self::Response(_) => MessageKind::Response,
            Self::Disconnect { .. } => MessageKind::Disconnect,
        }
    }

    /// Serialises the message into a datagram.
    ///
    /// # Errors
    ///
    /// Fails when a service name or payload does not fit its field.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Self::Connect {
                nonce,
                seq,
                service,
            } => encode_connect(*nonce, *seq, service),
            Self::ConnectAck {
                nonce,
                seq,
                connection,
            } => Ok(encode_connect_ack(*nonce, *seq, *connection)),
            Self::Query(exchange) => encode_query(exchange.connection, exchange.seq, &exchange.payload),
            Self::Response(exchange) => {
                encode_response(exchange.connection, exchange.seq, &exchange.payload)
            }
            Self::Disconnect { connection } => Ok(encode_disconnect(*connection)),
        }
    }

    /// Parses a datagram.
    ///
    /// # Errors
    ///
    /// Fails on a bad header, a truncated body, an oversized payload, an
    /// invalid service name or trailing bytes.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(datagram);
        let magic = reader.u16()?;
        if magic != MAGIC {
            return Err(WireError::BadMagic { found: magic });
        }
        let version = reader.u8()?;
        if version != VERSION {
            return Err(WireError::UnsupportedVersion { found: version });
        }
        let message = match MessageKind::from_byte(reader.u8()?)? {
            MessageKind::Connect => {
                let nonce = reader.u32()?;
                let seq = reader.u64()?;
                let name_len = usize::from(reader.u8()?);
                let name = reader.bytes(name_len)?;
                validate_service_name_len(name.len())?;
                let service = std::str::from_utf8(name)
                    .map_err(|_| WireError::ServiceNameEncoding)?
                    .to_owned();
                Self::Connect {
                    nonce,
                    seq,
                    service,
                }
            }
            MessageKind::ConnectAck => Self::ConnectAck {
                nonce: reader.u32()?,
                seq: reader.u64()?,
                connection: ConnectionId::new(reader.u32()?),
            },
            MessageKind::Query => Self::Query(reader.exchange()?),
            MessageKind::Response => Self::Response(reader.exchange()?),
            MessageKind::Disconnect => Self::Disconnect {
                connection: ConnectionId::new(reader.u32()?),
            },
        };
        reader.finish()?;
        Ok(message)
    }
}

/// Checks that `name` fits the CONNECT name field.
///
/// # Errors
///
/// Returns [`WireError::ServiceNameLength`] for empty or oversized names.
pub fn validate_service_name(name: &str) -> Result<(), WireError> {
    validate_service_name_len(name.len())
}

fn validate_service_name_len(size: usize) -> Result<(), WireError> {
    if size == 0 || size > MAX_SERVICE_NAME_BYTES {
        return Err(WireError::ServiceNameLength { size });
    }
    Ok(())
}

/// Checks that `payload` fits a QUERY or RESPONSE.
///
/// # Errors
///
/// Returns [`WireError::PayloadTooLarge`] above [`MAX_PAYLOAD_SIZE`].
pub fn validate_payload(payload: &[u8]) -> Result<(), WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
        });
    }
    Ok(())
}

/// Encodes a CONNECT without building a [`Message`].
///
/// # Errors
///
/// Fails when `service` does not fit the name field.
pub fn encode_connect(nonce: u32, seq: u64, service: &str) -> Result<Vec<u8>, WireError> {
    let name_len = u8::try_from(service.len())
        .map_err(|_| WireError::ServiceNameLength {
            size: service.len(),
        })?;
    validate_service_name(service)?;
    let mut datagram = header(MessageKind::Connect, 4 + 8 + 1 + service.len());
    datagram.extend_from_slice(&nonce.to_be_bytes());
    datagram.extend_from_slice(&seq.to_be_bytes());
    datagram.push(name_len);
    datagram.extend_from_slice(service.as_bytes());
    Ok(datagram)
}

/// Encodes a CONNECT_ACK.
#[must_use]
pub fn encode_connect_ack(nonce: u32, seq: u64, connection: ConnectionId) -> Vec<u8> {
    let mut datagram = header(MessageKind::ConnectAck, 4 + 8 + 4);
    datagram.extend_from_slice(&nonce.to_be_bytes());
    datagram.extend_from_slice(&seq.to_be_bytes());
    datagram.extend_from_slice(&connection.get().to_be_bytes());
    datagram
}

/// Encodes a QUERY directly from a borrowed payload.
///
/// # Errors
///
/// Fails when the payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn encode_query(
    connection: ConnectionId,
    seq: u64,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    encode_exchange(MessageKind::Query, connection, seq, payload)
}

/// Encodes a RESPONSE directly from a borrowed payload.
///
/// # Errors
///
/// Fails when the payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn encode_response(
    connection: ConnectionId,
    seq: u64,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    encode_exchange(MessageKind::Response, connection, seq, payload)
}

/// Encodes a DISCONNECT.
#[must_use]
pub fn encode_disconnect(connection: ConnectionId) -> Vec<u8> {
    let mut datagram = header(MessageKind::Disconnect, 4);
    datagram.extend_from_slice(&connection.get().to_be_bytes());
    datagram
}

fn encode_exchange(
    kind: MessageKind,
    connection: ConnectionId,
    seq: u64,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    validate_payload(payload)?;
    let len = u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        size: payload.len(),
    })?;
    let mut datagram = header(kind, EXCHANGE_OVERHEAD - HEADER_SIZE + payload.len());
    datagram.extend_from_slice(&connection.get().to_be_bytes());
    datagram.extend_from_slice(&seq.to_be_bytes());
    datagram.extend_from_slice(&len.to_be_bytes());
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

fn header(kind: MessageKind, body_len: usize) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(HEADER_SIZE + body_len);
    datagram.extend_from_slice(&MAGIC.to_be_bytes());
    datagram.push(VERSION);
    datagram.push(kind as u8);
    datagram
}

/// Cursor over a received datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + len;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::Truncated {
            needed: end,
            have: self.buf.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(u8::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn exchange(&mut self) -> Result<Exchange, WireError> {
        let connection = ConnectionId::new(self.u32()?);
        let seq = self.u64()?;
        let len = usize::from(self.u16()?);
        if len > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge { size: len });
        }
        let payload = self.bytes(len)?.to_vec();
        Ok(Exchange {
            connection,
            seq,
            payload,
        })
    }

    fn finish(&self) -> Result<(), WireError> {
        let extra = self.buf.len() - self.pos;
        if extra > 0 {
            return Err(WireError::TrailingBytes { extra });
        }
        Ok(())
    }
}
