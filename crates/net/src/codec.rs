//! Frame encoding and decoding.
//!
//! A plain frame is `[tag: u8][payload]`. Requests and responses wrap an
//! inner packet: `[Request|Response][id: i32][inner tag: u8][inner payload]`.

use crate::custom_event::DecodeContext;
use crate::error::DecodeError;
use crate::packets::{Packet, PacketType};
use crate::wire::{WireReader, WireWriter};

/// Encode a packet as a plain frame.
pub fn encode_packet<P: Packet>(packet: &P) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(64);
    w.write_u8(P::TYPE as u8);
    packet.write(&mut w);
    w.into_bytes()
}

/// Encode a packet wrapped in a request with correlation id `id`.
pub fn encode_request<P: Packet>(id: i32, packet: &P) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(64);
    w.write_u8(PacketType::Request as u8);
    w.write_i32(id);
    w.write_u8(P::TYPE as u8);
    packet.write(&mut w);
    w.into_bytes()
}

/// Wrap an already encoded plain frame as the response to request `id`.
pub fn encode_response(id: i32, reply: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(5 + reply.len());
    w.write_u8(PacketType::Response as u8);
    w.write_i32(id);
    w.write_raw(reply);
    w.into_bytes()
}

/// Decode the payload of a packet whose tag has already been consumed.
pub fn decode_payload<P: Packet>(payload: &[u8], ctx: &DecodeContext) -> Result<P, DecodeError> {
    let mut r = WireReader::new(payload);
    P::read(&mut r, ctx)
}

/// Decode a plain frame that must carry packet `P`.
pub fn decode_packet<P: Packet>(frame: &[u8], ctx: &DecodeContext) -> Result<P, DecodeError> {
    match Frame::parse(frame)? {
        Frame::Packet { ty, payload } if ty == P::TYPE => decode_payload(payload, ctx),
        other => Err(DecodeError::WrongPacketType {
            expected: P::TYPE,
            found: other.packet_type(),
        }),
    }
}

/// A frame split into its tag, optional correlation id and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Plain packet.
    Packet {
        /// Packet tag.
        ty: PacketType,
        /// Bytes after the tag.
        payload: &'a [u8],
    },
    /// Request expecting a response with the same id.
    Request {
        /// Correlation id.
        id: i32,
        /// Inner packet tag.
        ty: PacketType,
        /// Inner payload.
        payload: &'a [u8],
    },
    /// Response to an earlier request.
    Response {
        /// Correlation id.
        id: i32,
        /// Inner packet tag.
        ty: PacketType,
        /// Inner payload.
        payload: &'a [u8],
    },
}

impl<'a> Frame<'a> {
    /// Split a frame. Only the header is validated here.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        let ty = PacketType::try_from(r.read_u8()?)?;
        match ty {
            PacketType::Request | PacketType::Response => {
                let id = r.read_i32()?;
                let inner = PacketType::try_from(r.read_u8()?)?;
                if inner.is_wrapper() {
                    return Err(DecodeError::NestedWrapper);
                }
                let payload = r.rest();
                Ok(if ty == PacketType::Request {
                    Frame::Request {
                        id,
                        ty: inner,
                        payload,
                    }
                } else {
                    Frame::Response {
                        id,
                        ty: inner,
                        payload,
                    }
                })
            }
            ty => Ok(Frame::Packet {
                ty,
                payload: r.rest(),
            }),
        }
    }

    /// Tag of the packet carried, looking through request/response wrappers.
    pub fn packet_type(&self) -> PacketType {
        match *self {
            Frame::Packet { ty, .. } | Frame::Request { ty, .. } | Frame::Response { ty, .. } => ty,
        }
    }

    /// Payload of the carried packet.
    pub fn payload(&self) -> &'a [u8] {
        match *self {
            Frame::Packet { payload, .. }
            | Frame::Request { payload, .. }
            | Frame::Response { payload, .. } => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{PlayerDisconnect, PublicKeyRequest, PublicKeyResponse};

    #[test]
    fn plain_frame_starts_with_tag() {
        let frame = encode_packet(&PlayerDisconnect { ped_id: 3 });
        assert_eq!(frame, vec![PacketType::PlayerDisconnect as u8, 3, 0, 0, 0]);
    }

    #[test]
    fn request_frame_layout() {
        let frame = encode_request(-5, &PublicKeyRequest);
        assert_eq!(frame[0], PacketType::Request as u8);
        assert_eq!(&frame[1..5], &(-5i32).to_le_bytes());
        assert_eq!(frame[5], PacketType::PublicKeyRequest as u8);
        assert_eq!(
            Frame::parse(&frame).unwrap(),
            Frame::Request {
                id: -5,
                ty: PacketType::PublicKeyRequest,
                payload: &[],
            }
        );
    }

    #[test]
    fn response_wraps_reply_frame() {
        let reply = encode_packet(&PublicKeyResponse {
            modulus: vec![0xaa; 3],
            exponent: vec![1, 0, 1],
        });
        let frame = encode_response(99, &reply);
        match Frame::parse(&frame).unwrap() {
            Frame::Response { id, ty, payload } => {
                assert_eq!(id, 99);
                assert_eq!(ty, PacketType::PublicKeyResponse);
                let decoded: PublicKeyResponse =
                    decode_payload(payload, &DecodeContext::default()).unwrap();
                assert_eq!(decoded.exponent, vec![1, 0, 1]);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn decode_packet_checks_the_tag() {
        let frame = encode_packet(&PlayerDisconnect { ped_id: 1 });
        assert_eq!(
            decode_packet::<PublicKeyRequest>(&frame, &DecodeContext::default()),
            Err(DecodeError::WrongPacketType {
                expected: PacketType::PublicKeyRequest,
                found: PacketType::PlayerDisconnect,
            })
        );
    }

    #[test]
    fn nested_wrappers_are_rejected() {
        let frame = encode_response(1, &encode_response(2, &[PacketType::Handshake as u8]));
        assert_eq!(Frame::parse(&frame), Err(DecodeError::NestedWrapper));
    }

    #[test]
    fn empty_and_unknown_frames() {
        assert!(matches!(
            Frame::parse(&[]),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(Frame::parse(&[42]), Err(DecodeError::UnknownPacketType(42)));
        assert!(matches!(
            Frame::parse(&[PacketType::Request as u8, 1, 0]),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
