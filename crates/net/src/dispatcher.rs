//! Routing of decoded frames to packet handlers and pending requests.
//!
//! Each dispatcher owns its handler table and its [`Correlator`]; nothing
//! here is process-global. Handlers may fail or panic without taking the
//! receive loop down: both are caught, logged with the origin and packet
//! type, and reported as [`Dispatch::Failed`].

use crate::channel::ConnectionChannel;
use crate::codec::{decode_payload, encode_packet, encode_response, Frame};
use crate::correlator::Correlator;
use crate::custom_event::DecodeContext;
use crate::error::DecodeError;
use crate::packets::{Packet, PacketType};
use crate::transport::ConnectionId;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

/// Where a frame came from, and where its reply goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// An established connection.
    Connection(ConnectionId),
    /// A connectionless sender.
    Unconnected(SocketAddr),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Connection(conn) => write!(f, "connection {conn}"),
            Origin::Unconnected(addr) => write!(f, "unconnected {addr}"),
        }
    }
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran and produced nothing to send.
    Handled,
    /// A request handler ran; send `frame` back to the origin on the channel
    /// the request arrived on.
    Reply {
        /// Correlation id of the request.
        id: i32,
        /// Encoded response frame.
        frame: Vec<u8>,
    },
    /// A response woke the pending request with this id.
    Resolved(i32),
    /// A response matched no pending request.
    Dropped(i32),
    /// No handler is registered for the packet type.
    Unhandled(PacketType),
    /// The frame or its payload failed to decode.
    Rejected(DecodeError),
    /// The handler returned an error or panicked.
    Failed(PacketType),
}

enum HandlerError {
    Decode(DecodeError),
    Failed(anyhow::Error),
}

type Handler = Arc<
    dyn Fn(&Origin, &[u8], &DecodeContext) -> Result<Option<Vec<u8>>, HandlerError> + Send + Sync,
>;

/// Packet handler table plus the correlator for this endpoint.
pub struct Dispatcher {
    handlers: RwLock<HashMap<PacketType, Handler>>,
    correlator: Arc<Correlator>,
    context: DecodeContext,
}

impl Dispatcher {
    /// Dispatcher with its own correlator.
    pub fn new(context: DecodeContext) -> Self {
        Self::with_correlator(context, Arc::new(Correlator::new()))
    }

    /// Dispatcher resolving responses through `correlator`.
    pub fn with_correlator(context: DecodeContext, correlator: Arc<Correlator>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            correlator,
            context,
        }
    }

    /// The correlator responses are resolved against.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Decode context handed to every packet decoder.
    pub fn context(&self) -> &DecodeContext {
        &self.context
    }

    fn insert(&self, ty: PacketType, handler: Handler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(ty, handler).is_some() {
            debug!(packet = ?ty, "Replaced packet handler");
        }
    }

    /// Handle packets of type `P`.
    pub fn on<P, F>(&self, handler: F)
    where
        P: Packet,
        F: Fn(&Origin, P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(
            P::TYPE,
            Arc::new(move |origin, payload, ctx| {
                let packet = decode_payload::<P>(payload, ctx).map_err(HandlerError::Decode)?;
                handler(origin, packet).map_err(HandlerError::Failed)?;
                Ok(None)
            }),
        );
    }

    /// Handle requests carrying `P` by replying with an `R`.
    ///
    /// A plain (unwrapped) `P` runs the handler too; its reply is discarded.
    pub fn on_request<P, R, F>(&self, handler: F)
    where
        P: Packet,
        R: Packet,
        F: Fn(&Origin, P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.insert(
            P::TYPE,
            Arc::new(move |origin, payload, ctx| {
                let packet = decode_payload::<P>(payload, ctx).map_err(HandlerError::Decode)?;
                let reply = handler(origin, packet).map_err(HandlerError::Failed)?;
                Ok(Some(encode_packet(&reply)))
            }),
        );
    }

    /// Whether a handler is registered for `ty`.
    pub fn handles(&self, ty: PacketType) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&ty)
    }

    /// Route one plaintext frame.
    pub fn dispatch(&self, origin: Origin, channel: ConnectionChannel, frame: &[u8]) -> Dispatch {
        let parsed = match Frame::parse(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%origin, ?channel, "Dropping undecodable frame: {err}");
                return Dispatch::Rejected(err);
            }
        };
        trace!(%origin, ?channel, packet = ?parsed.packet_type(), "Dispatching frame");

        match parsed {
            Frame::Response { id, ty, payload } => {
                if self.correlator.resolve(id, ty, payload) {
                    Dispatch::Resolved(id)
                } else {
                    debug!(%origin, id, packet = ?ty, "Dropping response without pending request");
                    Dispatch::Dropped(id)
                }
            }
            Frame::Request { id, ty, payload } => match self.run(origin, ty, payload) {
                Ok(Some(reply)) => Dispatch::Reply {
                    id,
                    frame: encode_response(id, &reply),
                },
                Ok(None) => Dispatch::Handled,
                Err(outcome) => outcome,
            },
            Frame::Packet { ty, payload } => match self.run(origin, ty, payload) {
                Ok(_) => Dispatch::Handled,
                Err(outcome) => outcome,
            },
        }
    }

    fn run(
        &self,
        origin: Origin,
        ty: PacketType,
        payload: &[u8],
    ) -> Result<Option<Vec<u8>>, Dispatch> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&ty)
            .cloned();
        let Some(handler) = handler else {
            debug!(%origin, packet = ?ty, "No handler registered");
            return Err(Dispatch::Unhandled(ty));
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&origin, payload, &self.context))) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(HandlerError::Decode(err))) => {
                warn!(%origin, packet = ?ty, "Failed to decode packet: {err}");
                Err(Dispatch::Rejected(err))
            }
            Ok(Err(HandlerError::Failed(err))) => {
                warn!(%origin, packet = ?ty, "Packet handler failed: {err:#}");
                Err(Dispatch::Failed(ty))
            }
            Err(_) => {
                warn!(%origin, packet = ?ty, "Packet handler panicked");
                Err(Dispatch::Failed(ty))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_packet, encode_request};
    use crate::custom_event::{Arg, CustomEvent};
    use crate::packets::{ChatMessage, PublicKeyRequest, PublicKeyResponse};
    use std::sync::Mutex;
    use std::time::Duration;

    fn origin() -> Origin {
        Origin::Connection(ConnectionId(1))
    }

    #[test]
    fn plain_packets_reach_their_handler() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.on(move |origin: &Origin, event: CustomEvent| {
            sink.lock().unwrap().push((*origin, event));
            Ok(())
        });

        let event = CustomEvent::new(42, vec![Arg::Int32(7), Arg::from("go")]);
        let outcome = dispatcher.dispatch(origin(), ConnectionChannel::Event, &encode_packet(&event));
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(origin(), event)]);
    }

    #[test]
    fn requests_produce_wrapped_replies() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        dispatcher.on_request(|_: &Origin, _: PublicKeyRequest| {
            Ok(PublicKeyResponse {
                modulus: vec![7; 4],
                exponent: vec![3],
            })
        });

        let outcome = dispatcher.dispatch(
            Origin::Unconnected("10.0.0.2:4499".parse().unwrap()),
            ConnectionChannel::RequestResponse,
            &encode_request(1234, &PublicKeyRequest),
        );
        let Dispatch::Reply { id, frame } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(id, 1234);
        match Frame::parse(&frame).unwrap() {
            Frame::Response { id, ty, .. } => {
                assert_eq!(id, 1234);
                assert_eq!(ty, PacketType::PublicKeyResponse);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn responses_resolve_pending_requests() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        let waiter = dispatcher
            .correlator()
            .expect::<PublicKeyResponse>(DecodeContext::default());
        let reply = encode_packet(&PublicKeyResponse {
            modulus: vec![1],
            exponent: vec![3],
        });

        let outcome = dispatcher.dispatch(
            origin(),
            ConnectionChannel::RequestResponse,
            &encode_response(waiter.id(), &reply),
        );
        assert_eq!(outcome, Dispatch::Resolved(waiter.id()));
        let key = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(key.exponent, vec![3]);

        let stray = dispatcher.dispatch(
            origin(),
            ConnectionChannel::RequestResponse,
            &encode_response(99, &reply),
        );
        assert_eq!(stray, Dispatch::Dropped(99));
    }

    #[test]
    fn failures_are_contained() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        dispatcher.on(|_: &Origin, _: ChatMessage| anyhow::bail!("rejected"));
        dispatcher.on(|_: &Origin, _: CustomEvent| -> anyhow::Result<()> { panic!("boom") });

        let chat = encode_packet(&ChatMessage {
            username: "a".into(),
            message: "b".into(),
        });
        assert_eq!(
            dispatcher.dispatch(origin(), ConnectionChannel::Chat, &chat),
            Dispatch::Failed(PacketType::ChatMessage)
        );
        assert_eq!(
            dispatcher.dispatch(
                origin(),
                ConnectionChannel::Event,
                &encode_packet(&CustomEvent::default())
            ),
            Dispatch::Failed(PacketType::CustomEvent)
        );
        // Still dispatching after the panic.
        assert_eq!(
            dispatcher.dispatch(origin(), ConnectionChannel::Chat, &chat),
            Dispatch::Failed(PacketType::ChatMessage)
        );
    }

    #[test]
    fn undecodable_and_unhandled_frames() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        dispatcher.on(|_: &Origin, _: CustomEvent| Ok(()));

        assert_eq!(
            dispatcher.dispatch(origin(), ConnectionChannel::Default, &[200]),
            Dispatch::Rejected(DecodeError::UnknownPacketType(200))
        );
        assert!(matches!(
            dispatcher.dispatch(
                origin(),
                ConnectionChannel::Event,
                &[PacketType::CustomEvent as u8, 0, 1]
            ),
            Dispatch::Rejected(DecodeError::Truncated { .. })
        ));
        let chat = encode_packet(&ChatMessage {
            username: String::new(),
            message: String::new(),
        });
        assert_eq!(
            dispatcher.dispatch(origin(), ConnectionChannel::Chat, &chat),
            Dispatch::Unhandled(PacketType::ChatMessage)
        );
    }

    #[test]
    fn reply_frame_decodes_as_response_payload() {
        let dispatcher = Dispatcher::new(DecodeContext::default());
        dispatcher.on_request(|_: &Origin, request: ChatMessage| {
            Ok(ChatMessage {
                username: "server".into(),
                message: request.message.to_uppercase(),
            })
        });
        let Dispatch::Reply { frame, .. } = dispatcher.dispatch(
            origin(),
            ConnectionChannel::RequestResponse,
            &encode_request(
                5,
                &ChatMessage {
                    username: "c".into(),
                    message: "hi".into(),
                },
            ),
        ) else {
            panic!("expected a reply");
        };
        // Strip the response header to get the plain reply frame back.
        let reply: ChatMessage = decode_packet(&frame[5..], &DecodeContext::default()).unwrap();
        assert_eq!(reply.message, "HI");
    }
}
