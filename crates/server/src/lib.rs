#![warn(missing_docs)]
//! Server half of a coopsync session.
//!
//! The server hands out its public key to anyone who asks, admits players
//! through the handshake, and relays chat, entity syncs and custom events
//! between them. Every connection has its own session cipher.

pub mod config;
pub mod handshake;

pub use config::ServerConfig;
pub use handshake::{check_roster, verify, Admission, Rejection};

use anyhow::{bail, Context};
use coopsync_core::PlayerId;
use coopsync_net::packets::MAX_CHAT_LEN;
use coopsync_net::{
    decode_packet, encode_packet, event_hash, Arg, ChatMessage, ConnectionChannel, ConnectionId,
    CustomEvent, DecodeContext, DeliveryMethod, Dispatch, Dispatcher, EventHandlers, EventSender,
    Handshake, HandshakeSuccess, NetError, Origin, Packet, PedSync, PeerLink, PlayerConnect,
    PlayerDisconnect, PlayerInfo, PublicKey, PublicKeyRequest, PublicKeyResponse, Route,
    ServerKeys, SessionCipher, Transport, TransportEvent, TransportEvents, VehicleSync,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

struct Client {
    player: PlayerInfo,
    cipher: SessionCipher,
    established: bool,
}

struct Inner {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    keys: ServerKeys,
    dispatcher: Dispatcher,
    unconnected: Dispatcher,
    clients: RwLock<HashMap<ConnectionId, Client>>,
    events: EventHandlers,
}

/// A running server.
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Generate the key pair and start serving on `transport`.
    pub async fn start(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
    ) -> anyhow::Result<Self> {
        let bits = config.rsa_bits;
        let keys = tokio::task::spawn_blocking(move || ServerKeys::generate(bits))
            .await
            .context("Key generation task failed")?
            .context("Failed to generate server keys")?;
        Ok(Self::with_keys(config, keys, transport, events))
    }

    /// Start serving with an existing key pair.
    ///
    /// Spawns the event pump, so it must be called inside a Tokio runtime.
    pub fn with_keys(
        config: ServerConfig,
        keys: ServerKeys,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
    ) -> Self {
        Self::with_context(config, keys, transport, events, DecodeContext::default())
    }

    /// Like [`Server::with_keys`], decoding extension arguments with
    /// `context`.
    pub fn with_context(
        config: ServerConfig,
        keys: ServerKeys,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        context: DecodeContext,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            transport,
            keys,
            dispatcher: Dispatcher::new(context.clone()),
            unconnected: Dispatcher::new(context),
            clients: RwLock::new(HashMap::new()),
            events: EventHandlers::new(),
        });
        register_handlers(&inner);
        tokio::spawn(pump(Arc::downgrade(&inner), events));
        info!(
            name = %inner.config.name,
            addr = %inner.transport.local_addr(),
            fingerprint = %inner.keys.public_key().fingerprint(),
            "Server listening"
        );
        Self { inner }
    }

    /// Address the server is reachable at.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.transport.local_addr()
    }

    /// Public key clients encrypt their session with.
    pub fn public_key(&self) -> &PublicKey {
        self.inner.keys.public_key()
    }

    /// Settings in use.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Players whose session is established, ordered by id.
    pub fn players(&self) -> Vec<PlayerInfo> {
        self.inner.players()
    }

    /// Send `packet` to one player.
    pub fn send_to<P: Packet>(&self, player: PlayerId, packet: &P) -> Result<(), NetError> {
        self.inner.link_to(player)?.send(packet)
    }

    /// Send `packet` to every player. Returns how many it reached.
    pub fn broadcast<P: Packet>(&self, packet: &P) -> usize {
        self.inner.broadcast(packet, None)
    }

    /// Send a custom event to one player, or to everyone when `target` is
    /// `None`.
    pub fn send_custom_event(
        &self,
        target: Option<PlayerId>,
        event: &CustomEvent,
    ) -> Result<(), NetError> {
        match target {
            Some(player) => self.send_to(player, event),
            None => {
                self.broadcast(event);
                Ok(())
            }
        }
    }

    /// Send the event called `name` with `args`.
    pub fn trigger_event(
        &self,
        target: Option<PlayerId>,
        name: &str,
        args: Vec<Arg>,
    ) -> Result<(), NetError> {
        self.send_custom_event(target, &CustomEvent::new(event_hash(name), args))
    }

    /// Ask a player and wait up to `timeout` for a `T`.
    pub async fn request<T: Packet, P: Packet>(
        &self,
        player: PlayerId,
        packet: &P,
        timeout: Duration,
    ) -> Result<T, NetError> {
        self.request_on(player, packet, Route::REQUEST_RESPONSE, timeout)
            .await
    }

    /// Ask a player on `route`; the answer comes back on the same channel.
    pub async fn request_on<T: Packet, P: Packet>(
        &self,
        player: PlayerId,
        packet: &P,
        route: Route,
        timeout: Duration,
    ) -> Result<T, NetError> {
        let link = self.inner.link_to(player)?;
        let dispatcher = &self.inner.dispatcher;
        link.request_on(
            dispatcher.correlator(),
            dispatcher.context().clone(),
            packet,
            route,
            timeout,
        )
        .await
    }

    /// Answer requests for `P` from players.
    pub fn on_request<P, R, F>(&self, handler: F)
    where
        P: Packet,
        R: Packet,
        F: Fn(PlayerId, P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .dispatcher
            .on_request(move |origin: &Origin, packet: P| {
                let player = weak
                    .upgrade()
                    .and_then(|inner| inner.player_of(origin))
                    .context("request from a connection without a session")?;
                handler(player.id, packet)
            });
    }

    /// Handle the custom event called `name`. Returns its hash.
    pub fn register_event<F>(&self, name: &str, handler: F) -> i32
    where
        F: Fn(EventSender, &CustomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.register(name, handler)
    }

    /// Custom event handler table.
    pub fn events(&self) -> &EventHandlers {
        &self.inner.events
    }

    /// Disconnect a player. Returns whether the player was online.
    pub fn kick(&self, player: PlayerId, reason: &str) -> bool {
        let Some(conn) = self.inner.connection_of(player) else {
            return false;
        };
        info!(player, %conn, reason, "Kicking player");
        if let Err(err) = self.inner.transport.disconnect(conn, reason) {
            warn!(player, %conn, "Kick failed: {err}");
            return false;
        }
        true
    }

    /// Close every connection and stop the transport.
    pub fn shutdown(&self, reason: &str) {
        info!(reason, "Server shutting down");
        self.inner.transport.shutdown(reason);
    }
}

impl Inner {
    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Client>> {
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Client>> {
        self.clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn players(&self) -> Vec<PlayerInfo> {
        let mut players: Vec<PlayerInfo> = self
            .read_clients()
            .values()
            .filter(|client| client.established)
            .map(|client| client.player.clone())
            .collect();
        players.sort_by_key(|player| player.id);
        players
    }

    fn player_of(&self, origin: &Origin) -> Option<PlayerInfo> {
        let Origin::Connection(conn) = origin else {
            return None;
        };
        self.read_clients()
            .get(conn)
            .filter(|client| client.established)
            .map(|client| client.player.clone())
    }

    fn connection_of(&self, player: PlayerId) -> Option<ConnectionId> {
        self.read_clients()
            .iter()
            .find(|(_, client)| client.established && client.player.id == player)
            .map(|(conn, _)| *conn)
    }

    fn link_to(&self, player: PlayerId) -> Result<PeerLink, NetError> {
        self.read_clients()
            .iter()
            .find(|(_, client)| client.established && client.player.id == player)
            .map(|(conn, client)| {
                PeerLink::sealed(
                    Arc::clone(&self.transport),
                    Origin::Connection(*conn),
                    client.cipher.clone(),
                )
            })
            .ok_or(NetError::NotConnected)
    }

    /// Seal `packet` for every established player except `skip`.
    fn broadcast<P: Packet>(&self, packet: &P, skip: Option<ConnectionId>) -> usize {
        let frame = encode_packet(packet);
        let route = P::TYPE.default_route();
        let mut reached = 0;
        for (conn, client) in self.read_clients().iter() {
            if !client.established || Some(*conn) == skip {
                continue;
            }
            let link = PeerLink::sealed(
                Arc::clone(&self.transport),
                Origin::Connection(*conn),
                client.cipher.clone(),
            );
            match link.send_frame(frame.clone(), route) {
                Ok(()) => reached += 1,
                Err(err) => debug!(%conn, packet = ?P::TYPE, "Broadcast send failed: {err}"),
            }
        }
        reached
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionRequest {
                conn,
                remote,
                payload,
            } => {
                // Admission decrypts with the private key; keep it off the pump.
                let inner = Arc::clone(self);
                tokio::task::spawn_blocking(move || {
                    inner.on_connection_request(conn, remote, &payload)
                });
            }
            TransportEvent::Connected { conn, remote, .. } => self.on_connected(conn, remote),
            TransportEvent::Disconnected { conn, reason } => self.on_disconnected(conn, &reason),
            TransportEvent::Message {
                conn,
                channel,
                payload,
            } => self.on_message(conn, channel, &payload),
            TransportEvent::Unconnected { from, payload } => {
                let outcome = self.unconnected.dispatch(
                    Origin::Unconnected(from),
                    ConnectionChannel::Default,
                    &payload,
                );
                if let Dispatch::Reply { frame, .. } = outcome {
                    if let Err(err) = self.transport.send_unconnected(from, frame) {
                        warn!(remote = %from, "Failed to answer unconnected request: {err}");
                    }
                }
            }
        }
    }

    #[instrument(skip(self, payload), fields(len = payload.len()))]
    fn on_connection_request(&self, conn: ConnectionId, remote: SocketAddr, payload: &[u8]) {
        let handshake = decode_packet::<Handshake>(payload, self.dispatcher.context())
            .map_err(|err| {
                debug!("Undecodable handshake: {err}");
                Rejection::Malformed
            });

        let admission = handshake.and_then(|handshake| {
            debug!(
                username = %handshake.username,
                version = %handshake.mod_version,
                "Join request"
            );
            verify(&handshake, &self.keys, &self.config)
        });

        let mut clients = self.write_clients();
        let admission = admission.and_then(|admission| {
            check_roster(
                &admission.player,
                &self.config,
                clients.values().map(|client| &client.player),
            )
            .map(|()| admission)
        });
        let admission = match admission {
            Ok(admission) => admission,
            Err(rejection) => {
                drop(clients);
                info!(reason = %rejection, "Join refused");
                if let Err(err) = self.transport.deny(conn, &rejection.to_string()) {
                    debug!("Deny failed: {err}");
                }
                return;
            }
        };

        let mut online: Vec<PlayerInfo> = clients
            .values()
            .filter(|client| client.established)
            .map(|client| client.player.clone())
            .collect();
        online.sort_by_key(|player| player.id);
        let hail = encode_packet(&HandshakeSuccess { players: online });

        let player = admission.player.clone();
        clients.insert(
            conn,
            Client {
                player: admission.player,
                cipher: admission.cipher,
                established: false,
            },
        );
        drop(clients);

        if let Err(err) = self.transport.approve(conn, hail) {
            warn!(player = player.id, "Approve failed: {err}");
            self.write_clients().remove(&conn);
            return;
        }
        debug!(player = player.id, username = %player.username, "Join approved");
    }

    fn on_connected(&self, conn: ConnectionId, remote: SocketAddr) {
        let player = {
            let mut clients = self.write_clients();
            let Some(client) = clients.get_mut(&conn) else {
                debug!(%conn, "Connected event for an unknown connection");
                return;
            };
            client.established = true;
            client.player.clone()
        };
        info!(player = player.id, username = %player.username, %conn, %remote, "Player joined");
        self.broadcast(
            &PlayerConnect {
                ped_id: player.id,
                username: player.username,
            },
            Some(conn),
        );
    }

    fn on_disconnected(&self, conn: ConnectionId, reason: &str) {
        let Some(client) = self.write_clients().remove(&conn) else {
            trace!(%conn, reason, "Unknown connection closed");
            return;
        };
        if !client.established {
            debug!(%conn, reason, "Pending join dropped");
            return;
        }
        info!(player = client.player.id, username = %client.player.username, reason, "Player left");
        self.broadcast(
            &PlayerDisconnect {
                ped_id: client.player.id,
            },
            None,
        );
    }

    fn on_message(&self, conn: ConnectionId, channel: ConnectionChannel, payload: &[u8]) {
        let cipher = match self.read_clients().get(&conn) {
            Some(client) if client.established => client.cipher.clone(),
            _ => {
                trace!(%conn, ?channel, "Dropping frame from a connection without a session");
                return;
            }
        };
        let frame = match cipher.open(payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%conn, ?channel, "Dropping frame that failed to open: {err}");
                return;
            }
        };

        let origin = Origin::Connection(conn);
        if let Dispatch::Reply { id, frame } = self.dispatcher.dispatch(origin, channel, &frame) {
            let link = PeerLink::sealed(Arc::clone(&self.transport), origin, cipher);
            let route = Route::new(channel, DeliveryMethod::ReliableUnordered);
            if let Err(err) = link.send_frame(frame, route) {
                warn!(%conn, id, "Failed to send response: {err}");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.transport.shutdown("server closed");
    }
}

fn register_handlers(inner: &Arc<Inner>) {
    let public_key = PublicKeyResponse::from(inner.keys.public_key());
    for dispatcher in [&inner.dispatcher, &inner.unconnected] {
        let response = public_key.clone();
        dispatcher.on_request(move |origin: &Origin, _request: PublicKeyRequest| {
            debug!(%origin, "Public key requested");
            Ok(response.clone())
        });
    }

    let weak = Arc::downgrade(inner);
    inner
        .dispatcher
        .on(move |origin: &Origin, chat: ChatMessage| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let player = inner
                .player_of(origin)
                .context("chat from a connection without a session")?;
            let message: String = chat.message.chars().take(MAX_CHAT_LEN).collect();
            if message.trim().is_empty() {
                return Ok(());
            }
            info!(player = player.id, "{}: {}", player.username, message);
            inner.broadcast(
                &ChatMessage {
                    username: player.username,
                    message,
                },
                None,
            );
            Ok(())
        });

    let weak = Arc::downgrade(inner);
    inner
        .dispatcher
        .on(move |origin: &Origin, sync: VehicleSync| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            inner.relay_sync(origin, sync.owner_id, &sync)
        });

    let weak = Arc::downgrade(inner);
    inner.dispatcher.on(move |origin: &Origin, sync: PedSync| {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        inner.relay_sync(origin, sync.owner_id, &sync)
    });

    let weak = Arc::downgrade(inner);
    inner
        .dispatcher
        .on(move |origin: &Origin, event: CustomEvent| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let player = inner
                .player_of(origin)
                .context("custom event from a connection without a session")?;
            inner.events.invoke(EventSender::Player(player.id), &event);
            Ok(())
        });
}

impl Inner {
    fn relay_sync<P: Packet>(
        &self,
        origin: &Origin,
        owner: PlayerId,
        sync: &P,
    ) -> anyhow::Result<()> {
        let Some(player) = self.player_of(origin) else {
            bail!("sync from a connection without a session");
        };
        if player.id != owner {
            bail!("player {} sent a sync owned by {owner}", player.id);
        }
        let skip = match origin {
            Origin::Connection(conn) => Some(*conn),
            Origin::Unconnected(_) => None,
        };
        self.broadcast(sync, skip);
        Ok(())
    }
}

async fn pump(inner: Weak<Inner>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
    debug!("Server event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use coopsync_net::MemoryNetwork;

    #[tokio::test]
    async fn unknown_players_are_not_reachable() {
        let network = MemoryNetwork::new();
        let (transport, events) = network.bind_any().unwrap();
        let transport: Arc<dyn Transport> = transport;
        let keys = ServerKeys::generate(1024).unwrap();
        let server = Server::with_keys(ServerConfig::default(), keys, transport, events);

        assert!(server.players().is_empty());
        assert!(matches!(
            server.send_to(7, &ChatMessage::default()),
            Err(NetError::NotConnected)
        ));
        assert_eq!(server.broadcast(&ChatMessage::default()), 0);
        assert!(!server.kick(7, "bye"));
    }

    #[tokio::test]
    async fn public_key_is_served_without_a_connection() {
        let network = MemoryNetwork::new();
        let (transport, events) = network.bind_any().unwrap();
        let transport: Arc<dyn Transport> = transport;
        let keys = ServerKeys::generate(1024).unwrap();
        let server = Server::with_keys(ServerConfig::default(), keys, transport, events);

        let (probe, mut probe_events) = network.bind_any().unwrap();
        let probe: Arc<dyn Transport> = probe;
        let correlator = Arc::new(coopsync_net::Correlator::new());
        let dispatcher = Dispatcher::with_correlator(DecodeContext::default(), Arc::clone(&correlator));
        let pending = correlator.expect::<PublicKeyResponse>(DecodeContext::default());
        probe
            .send_unconnected(
                server.local_addr(),
                coopsync_net::encode_request(pending.id(), &PublicKeyRequest),
            )
            .unwrap();

        let Some(TransportEvent::Unconnected { payload, .. }) = probe_events.recv().await else {
            panic!("expected an unconnected reply");
        };
        let id = pending.id();
        assert_eq!(
            dispatcher.dispatch(
                Origin::Unconnected(server.local_addr()),
                ConnectionChannel::Default,
                &payload
            ),
            Dispatch::Resolved(id)
        );
        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(PublicKey::from(response), *server.public_key());
    }
}
