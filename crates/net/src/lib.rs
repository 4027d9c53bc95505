#![warn(missing_docs)]
//! Protocol layer shared by the client and the server.
//!
//! Frames are built by the [`codec`] from [`packets`], sealed with the
//! session cipher from [`security`], and carried by a [`Transport`]. On the
//! receiving side a [`Dispatcher`] routes frames to handlers or to the
//! [`Correlator`] waiting for a response.

pub mod channel;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod custom_event;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod memory;
pub mod packets;
pub mod quic;
pub mod security;
pub mod transport;
pub mod wire;

pub use channel::{ConnectionChannel, DeliveryMethod, Route};
pub use codec::{decode_packet, decode_payload, encode_packet, encode_request, encode_response, Frame};
pub use config::NetConfig;
pub use correlator::{Correlator, PendingResponse};
pub use custom_event::{
    event_hash, Arg, ArgResolver, CustomEvent, CustomEventFlags, DecodeContext, EventHandler,
    EventHandlers, EventSender, ResolverRegistry,
};
pub use dispatcher::{Dispatch, Dispatcher, Origin};
pub use error::{CryptoError, DecodeError, NetError, TransportError};
pub use link::PeerLink;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use packets::{
    compute_schema_hash, ChatMessage, Handshake, HandshakeSuccess, Packet, PacketType, PedSync,
    PlayerConnect, PlayerDisconnect, PlayerInfo, PublicKeyRequest, PublicKeyResponse, VehicleSync,
};
pub use quic::QuicTransport;
pub use security::{PublicKey, ServerKeys, Session, SessionCipher};
pub use transport::{ConnectionId, Transport, TransportEvent, TransportEvents};
