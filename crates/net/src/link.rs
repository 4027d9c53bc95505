//! Sending packets to one peer.
//!
//! A [`PeerLink`] pairs a transport with a destination and, once the
//! session is established, the cipher frames to that peer are sealed with.
//! Connectionless frames are never encrypted.

use crate::channel::Route;
use crate::codec::{encode_packet, encode_request};
use crate::correlator::Correlator;
use crate::custom_event::DecodeContext;
use crate::dispatcher::Origin;
use crate::error::NetError;
use crate::packets::Packet;
use crate::security::SessionCipher;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Destination for outgoing frames.
#[derive(Clone)]
pub struct PeerLink {
    transport: Arc<dyn Transport>,
    peer: Origin,
    cipher: Option<SessionCipher>,
}

impl PeerLink {
    /// Link to `peer` without encryption.
    pub fn new(transport: Arc<dyn Transport>, peer: Origin) -> Self {
        Self {
            transport,
            peer,
            cipher: None,
        }
    }

    /// Link whose connected frames are sealed with `cipher`.
    pub fn sealed(transport: Arc<dyn Transport>, peer: Origin, cipher: SessionCipher) -> Self {
        Self {
            transport,
            peer,
            cipher: Some(cipher),
        }
    }

    /// Destination of this link.
    pub fn peer(&self) -> Origin {
        self.peer
    }

    /// Transport frames go out on.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `packet` on its default route.
    pub fn send<P: Packet>(&self, packet: &P) -> Result<(), NetError> {
        self.send_on(packet, P::TYPE.default_route())
    }

    /// Send `packet` on an explicit route.
    pub fn send_on<P: Packet>(&self, packet: &P, route: Route) -> Result<(), NetError> {
        self.send_frame(encode_packet(packet), route)
    }

    /// Send an already encoded frame, sealing it when the link has a cipher.
    pub fn send_frame(&self, frame: Vec<u8>, route: Route) -> Result<(), NetError> {
        match self.peer {
            Origin::Connection(conn) => {
                let bytes = match &self.cipher {
                    Some(cipher) => cipher.seal(&frame),
                    None => frame,
                };
                trace!(%conn, channel = ?route.channel, len = bytes.len(), "Sending frame");
                self.transport
                    .send(Some(conn), bytes, route.delivery, route.channel)?;
            }
            Origin::Unconnected(addr) => {
                trace!(%addr, len = frame.len(), "Sending unconnected frame");
                self.transport.send_unconnected(addr, frame)?;
            }
        }
        Ok(())
    }

    /// Send `packet` as a request and wait up to `timeout` for a `T` back.
    ///
    /// The response is delivered through `correlator`, so the dispatcher
    /// receiving this peer's frames must share it.
    pub async fn request<T, P>(
        &self,
        correlator: &Correlator,
        ctx: DecodeContext,
        packet: &P,
        timeout: Duration,
    ) -> Result<T, NetError>
    where
        T: Packet,
        P: Packet,
    {
        self.request_on(correlator, ctx, packet, Route::REQUEST_RESPONSE, timeout)
            .await
    }

    /// Like [`PeerLink::request`], with the request sent on `route`.
    ///
    /// Responders reply on the channel the request arrived on.
    pub async fn request_on<T, P>(
        &self,
        correlator: &Correlator,
        ctx: DecodeContext,
        packet: &P,
        route: Route,
        timeout: Duration,
    ) -> Result<T, NetError>
    where
        T: Packet,
        P: Packet,
    {
        let pending = correlator.expect::<T>(ctx);
        self.send_frame(encode_request(pending.id(), packet), route)?;
        pending.wait(timeout).await
    }

    /// Fire a request and run `callback` with the response from a task.
    ///
    /// Failures, including timeouts, are logged and the callback is skipped.
    pub fn request_with_callback<T, P, F>(
        &self,
        correlator: &Correlator,
        ctx: DecodeContext,
        packet: &P,
        timeout: Duration,
        callback: F,
    ) -> Result<(), NetError>
    where
        T: Packet,
        P: Packet,
        F: FnOnce(T) + Send + 'static,
    {
        self.request_with_callback_on(
            correlator,
            ctx,
            packet,
            Route::REQUEST_RESPONSE,
            timeout,
            callback,
        )
    }

    /// Like [`PeerLink::request_with_callback`], with the request sent on `route`.
    pub fn request_with_callback_on<T, P, F>(
        &self,
        correlator: &Correlator,
        ctx: DecodeContext,
        packet: &P,
        route: Route,
        timeout: Duration,
        callback: F,
    ) -> Result<(), NetError>
    where
        T: Packet,
        P: Packet,
        F: FnOnce(T) + Send + 'static,
    {
        let pending = correlator.expect::<T>(ctx);
        let id = pending.id();
        self.send_frame(encode_request(id, packet), route)?;
        let peer = self.peer;
        tokio::spawn(async move {
            match pending.wait(timeout).await {
                Ok(response) => callback(response),
                Err(err) => warn!(%peer, id, "Request failed: {err}"),
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer", &self.peer)
            .field("sealed", &self.cipher.is_some())
            .finish()
    }
}
