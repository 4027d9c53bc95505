//! Error types of the networking layer.

use crate::transport::ConnectionId;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure to decode a single inbound message.
///
/// A decode error only ever aborts the message it was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The message ended before a field was complete.
    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the message.
        remaining: usize,
    },
    /// A custom event argument carried a type code nobody can decode.
    #[error("unexpected argument type 0x{0:02x}")]
    UnexpectedType(u8),
    /// The leading tag does not name a packet type.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
    /// A packet of another type was found where a specific one was expected.
    #[error("expected packet {expected:?}, found {found:?}")]
    WrongPacketType {
        /// Type the caller asked for.
        expected: crate::packets::PacketType,
        /// Type carried by the frame.
        found: crate::packets::PacketType,
    },
    /// A request or response wraps another request or response.
    #[error("request and response frames cannot be nested")]
    NestedWrapper,
    /// A channel byte does not name a connection channel.
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    /// A string field is not valid UTF-8.
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    /// A count or length prefix is negative or cannot fit in the message.
    #[error("invalid length prefix {0}")]
    BadLength(i64),
    /// A numeric field holds a value outside the range of its type.
    #[error("value {value} out of range for {field}")]
    OutOfRange {
        /// Name of the field.
        field: &'static str,
        /// Offending value.
        value: i64,
    },
}

/// Failure inside the session security layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Asymmetric encryption was attempted before the server key was known.
    #[error("server public key has not been set")]
    MissingPublicKey,
    /// Key generation, encryption or decryption failed inside RSA.
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    /// Session key or IV has the wrong size.
    #[error("session key or iv has an invalid length")]
    InvalidKeyLength,
    /// A sealed frame did not decrypt to validly padded plaintext.
    #[error("sealed frame failed to decrypt")]
    BadCiphertext,
}

/// Failure reported by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down.
    #[error("transport is shut down")]
    Closed,
    /// No connection with this id exists.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The connection exists but has not been approved yet.
    #[error("connection {0} is not established")]
    NotEstablished(ConnectionId),
    /// The connection is not a pending inbound request.
    #[error("connection {0} is not awaiting approval")]
    NotPending(ConnectionId),
    /// Another endpoint already owns the address.
    #[error("address {0} is already in use")]
    AddrInUse(SocketAddr),
    /// Setup or I/O failure in the underlying stack.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Umbrella error for networking operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// A message failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Session security failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// No response arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,
    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,
    /// An address string could not be parsed into an endpoint.
    #[error("malformed address: {0}")]
    MalformedAddress(String),
    /// Argument codes 0x01 through 0x15 belong to the core codec.
    #[error("argument type 0x{0:02x} is reserved")]
    ReservedArgType(u8),
}
