//! Transport boundary.
//!
//! A transport moves opaque byte frames between endpoints. It knows about
//! connections (request, approve/deny, disconnect), channels and delivery
//! modes, but nothing about packets or encryption. Inbound activity is
//! reported as [`TransportEvent`]s on the receiver returned when the
//! transport is created.

use crate::channel::{ConnectionChannel, DeliveryMethod};
use crate::error::TransportError;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Endpoint-local identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote endpoint asked to connect. Answer with
    /// [`Transport::approve`] or [`Transport::deny`].
    ConnectionRequest {
        /// Id assigned to the pending connection.
        conn: ConnectionId,
        /// Remote address.
        remote: SocketAddr,
        /// Payload supplied to [`Transport::connect`].
        payload: Vec<u8>,
    },
    /// A connection was approved. On the connecting side `hail` carries the
    /// approval payload; on the approving side it is empty.
    Connected {
        /// Connection id.
        conn: ConnectionId,
        /// Remote address.
        remote: SocketAddr,
        /// Approval payload.
        hail: Vec<u8>,
    },
    /// A requested or established connection went away.
    Disconnected {
        /// Connection id.
        conn: ConnectionId,
        /// Human-readable reason.
        reason: String,
    },
    /// A frame arrived on an established connection.
    Message {
        /// Connection id.
        conn: ConnectionId,
        /// Channel the frame was sent on.
        channel: ConnectionChannel,
        /// Frame bytes.
        payload: Vec<u8>,
    },
    /// A frame arrived outside of any connection.
    Unconnected {
        /// Sender address.
        from: SocketAddr,
        /// Frame bytes.
        payload: Vec<u8>,
    },
}

/// Receiver of a transport's events.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Connection-oriented datagram transport.
///
/// Every method returns without waiting for the network; outcomes that
/// arrive later are reported as events.
pub trait Transport: Send + Sync {
    /// Address this endpoint is reachable at.
    fn local_addr(&self) -> SocketAddr;

    /// Ask `remote` for a connection, attaching `payload` to the request.
    ///
    /// The returned id is reported again in the `Connected` or
    /// `Disconnected` event that settles the attempt.
    fn connect(&self, remote: SocketAddr, payload: Vec<u8>) -> Result<ConnectionId, TransportError>;

    /// Accept a pending connection request, sending `hail` to the requester.
    fn approve(&self, conn: ConnectionId, hail: Vec<u8>) -> Result<(), TransportError>;

    /// Refuse a pending connection request.
    fn deny(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError>;

    /// Send a frame to one established connection, or to every established
    /// connection when `target` is `None`.
    fn send(
        &self,
        target: Option<ConnectionId>,
        payload: Vec<u8>,
        delivery: DeliveryMethod,
        channel: ConnectionChannel,
    ) -> Result<(), TransportError>;

    /// Send a frame outside of any connection. Delivery is best effort.
    fn send_unconnected(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close a connection.
    fn disconnect(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError>;

    /// Current round-trip time estimate of a connection.
    fn round_trip_time(&self, conn: ConnectionId) -> Option<Duration>;

    /// Close every connection and stop the endpoint.
    fn shutdown(&self, reason: &str);
}
