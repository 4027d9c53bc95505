//! Logical channels and delivery modes.
//!
//! Every frame travels on a [`ConnectionChannel`] with a [`DeliveryMethod`].
//! Each packet type has a default [`Route`]; callers may override it.

use crate::error::DecodeError;
use crate::packets::PacketType;

/// Logical channel identifier, written as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionChannel {
    /// Session and miscellaneous traffic.
    Default = 0,
    /// Chat lines.
    Chat = 1,
    /// Player join/leave notices.
    Player = 2,
    /// Custom events.
    Event = 3,
    /// Resource transfer.
    File = 4,
    /// Wrapped requests and their responses.
    RequestResponse = 5,
    /// Vehicle snapshots.
    VehicleSync = 6,
    /// Ped snapshots.
    PedSync = 7,
}

impl TryFrom<u8> for ConnectionChannel {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectionChannel::Default),
            1 => Ok(ConnectionChannel::Chat),
            2 => Ok(ConnectionChannel::Player),
            3 => Ok(ConnectionChannel::Event),
            4 => Ok(ConnectionChannel::File),
            5 => Ok(ConnectionChannel::RequestResponse),
            6 => Ok(ConnectionChannel::VehicleSync),
            7 => Ok(ConnectionChannel::PedSync),
            other => Err(DecodeError::UnknownChannel(other)),
        }
    }
}

/// Delivery guarantee requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryMethod {
    /// Delivered once, in send order within the channel.
    ReliableOrdered = 0,
    /// Delivered once, in any order.
    ReliableUnordered = 1,
    /// May be dropped or reordered.
    Unreliable = 2,
}

impl DeliveryMethod {
    /// Whether the transport must retransmit lost frames.
    pub fn is_reliable(self) -> bool {
        !matches!(self, DeliveryMethod::Unreliable)
    }
}

/// Channel and delivery mode for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    /// Logical channel.
    pub channel: ConnectionChannel,
    /// Delivery mode.
    pub delivery: DeliveryMethod,
}

impl Route {
    /// Build a route.
    pub const fn new(channel: ConnectionChannel, delivery: DeliveryMethod) -> Self {
        Self { channel, delivery }
    }

    /// Route of request and response frames.
    pub const REQUEST_RESPONSE: Route = Route::new(
        ConnectionChannel::RequestResponse,
        DeliveryMethod::ReliableUnordered,
    );
}

impl PacketType {
    /// Route used when the sender does not pick one.
    pub fn default_route(self) -> Route {
        use ConnectionChannel as C;
        use DeliveryMethod as D;
        match self {
            PacketType::Handshake
            | PacketType::HandshakeSuccess
            | PacketType::PublicKeyRequest
            | PacketType::PublicKeyResponse => Route::new(C::Default, D::ReliableOrdered),
            PacketType::PlayerConnect | PacketType::PlayerDisconnect => {
                Route::new(C::Player, D::ReliableOrdered)
            }
            PacketType::ChatMessage => Route::new(C::Chat, D::ReliableOrdered),
            PacketType::CustomEvent => Route::new(C::Event, D::ReliableOrdered),
            PacketType::VehicleSync => Route::new(C::VehicleSync, D::Unreliable),
            PacketType::PedSync => Route::new(C::PedSync, D::Unreliable),
            PacketType::Request | PacketType::Response => Route::REQUEST_RESPONSE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_bytes_round_trip() {
        for byte in 0..=7u8 {
            let channel = ConnectionChannel::try_from(byte).unwrap();
            assert_eq!(channel as u8, byte);
        }
        assert_eq!(
            ConnectionChannel::try_from(8),
            Err(DecodeError::UnknownChannel(8))
        );
    }

    #[test]
    fn sync_traffic_is_unreliable() {
        assert!(!PacketType::VehicleSync.default_route().delivery.is_reliable());
        assert!(!PacketType::PedSync.default_route().delivery.is_reliable());
        assert!(PacketType::CustomEvent.default_route().delivery.is_reliable());
        assert!(PacketType::ChatMessage.default_route().delivery.is_reliable());
    }

    #[test]
    fn wrappers_use_request_channel() {
        assert_eq!(
            PacketType::Request.default_route().channel,
            ConnectionChannel::RequestResponse
        );
        assert_eq!(PacketType::Response.default_route(), Route::REQUEST_RESPONSE);
    }
}
