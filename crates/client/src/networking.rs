//! Client side of a session.
//!
//! [`ClientNetworking`] drives the connect sequence (public key fetch,
//! handshake, approval), pumps transport events through its dispatcher and
//! keeps the remote entity pool up to date. Everything that must touch the
//! host simulation is queued and runs from [`ClientNetworking::tick`].

use crate::error::ConnectError;
use crate::players::PlayerList;
use coopsync_core::{new_entity_id, ActionQueue, ModelRef, PlayerId, SimTick};
use coopsync_net::custom_event::run_handlers;
use coopsync_net::{
    compute_schema_hash, decode_packet, encode_packet, event_hash, Arg, ChatMessage,
    ConnectionChannel, ConnectionId, CustomEvent, DecodeContext, DeliveryMethod, Dispatch,
    Dispatcher, EventHandlers, EventSender, Handshake, HandshakeSuccess, NetConfig, NetError,
    Origin, Packet, PedSync, PeerLink, PlayerConnect, PlayerDisconnect, PublicKey,
    PublicKeyRequest, PublicKeyResponse, Route, Session, SessionCipher, Transport,
    TransportEvent, TransportEvents, VehicleSync,
};
use coopsync_sync::pool::lock;
use coopsync_sync::{
    capture_ped, capture_vehicle, EntityPool, HostWorld, ReconcileConfig, Reconciler, Shared,
    SyncedPed, SyncedVehicle, TickClock, TickReport,
};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Client settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeouts.
    pub net: NetConfig,
    /// Entity correction tuning.
    pub reconcile: ReconcileConfig,
}

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected.
    Idle,
    /// Fetching the server key.
    Connecting,
    /// Handshake sent on this connection; waiting for the server's answer.
    AwaitingApproval(ConnectionId),
    /// Session established.
    Connected(ConnectionId),
}

enum Status {
    Idle,
    Connecting {
        attempt: u64,
        cancel: watch::Sender<bool>,
    },
    AwaitingApproval {
        conn: ConnectionId,
        cipher: SessionCipher,
    },
    Connected {
        conn: ConnectionId,
        cipher: SessionCipher,
    },
}

impl Status {
    fn public(&self) -> ConnectionStatus {
        match self {
            Status::Idle => ConnectionStatus::Idle,
            Status::Connecting { .. } => ConnectionStatus::Connecting,
            Status::AwaitingApproval { conn, .. } => ConnectionStatus::AwaitingApproval(*conn),
            Status::Connected { conn, .. } => ConnectionStatus::Connected(*conn),
        }
    }
}

struct ConnectRequest {
    remote: SocketAddr,
    username: String,
    password: String,
    public_key: Option<PublicKey>,
}

struct Inner<H: HostWorld> {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    session: Mutex<Session>,
    status: Mutex<Status>,
    status_tx: watch::Sender<ConnectionStatus>,
    attempts: AtomicU64,
    players: PlayerList,
    pool: EntityPool<H::Handle>,
    actions: ActionQueue<H>,
    events: EventHandlers,
    tick: AtomicU64,
    local_player_id: PlayerId,
    config: ClientConfig,
}

/// Networking half of a client.
///
/// Cheap to share by reference; all state lives behind one `Arc` that the
/// background event pump also holds weakly.
pub struct ClientNetworking<H: HostWorld + 'static> {
    inner: Arc<Inner<H>>,
    reconciler: Reconciler,
}

impl<H: HostWorld + 'static> ClientNetworking<H> {
    /// Client on `transport`, consuming its `events`.
    ///
    /// Spawns the event pump, so it must be called inside a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, events: TransportEvents, config: ClientConfig) -> Self {
        Self::with_context(transport, events, config, DecodeContext::default())
    }

    /// Like [`ClientNetworking::new`], decoding extension arguments with
    /// `context`.
    pub fn with_context(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: ClientConfig,
        context: DecodeContext,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        let inner = Arc::new(Inner {
            transport,
            dispatcher: Dispatcher::new(context),
            session: Mutex::new(Session::new()),
            status: Mutex::new(Status::Idle),
            status_tx,
            attempts: AtomicU64::new(0),
            players: PlayerList::new(),
            pool: EntityPool::new(),
            actions: ActionQueue::new(),
            events: EventHandlers::new(),
            tick: AtomicU64::new(0),
            local_player_id: new_entity_id(),
            config,
        });
        register_handlers(&inner);
        tokio::spawn(pump(Arc::downgrade(&inner), events));
        debug!(
            addr = %inner.transport.local_addr(),
            player = inner.local_player_id,
            "Client networking ready"
        );
        Self {
            inner,
            reconciler: Reconciler::new(config.reconcile),
        }
    }

    /// Start connecting to `address` (`host:port`).
    ///
    /// Address and state problems are reported immediately; everything else
    /// through the returned task. When `public_key` is `None` it is fetched
    /// from the server first.
    pub fn connect(
        &self,
        address: &str,
        username: &str,
        password: &str,
        public_key: Option<PublicKey>,
    ) -> Result<JoinHandle<Result<ConnectionId, ConnectError>>, ConnectError> {
        let remote = resolve(address)?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut status = self.inner.lock_status();
            match &*status {
                Status::Idle => {}
                Status::Connecting { .. } | Status::AwaitingApproval { .. } => {
                    return Err(ConnectError::AlreadyConnecting)
                }
                Status::Connected { .. } => return Err(ConnectError::AlreadyConnected),
            }
            self.inner.set_status(
                &mut status,
                Status::Connecting {
                    attempt,
                    cancel: cancel_tx,
                },
            );
        }

        lock(&self.inner.session).regenerate();
        self.inner.players.clear();
        self.inner.players.set(self.inner.local_player_id, username);
        self.inner.clear_remote_entities();
        self.inner.notify("Trying to connect...".to_owned());
        info!(%remote, username, attempt, "Connecting");

        let inner = Arc::clone(&self.inner);
        let request = ConnectRequest {
            remote,
            username: username.to_owned(),
            password: password.to_owned(),
            public_key,
        };
        Ok(tokio::spawn(async move {
            let result = inner.run_connect(attempt, request, cancel_rx).await;
            if let Err(err) = &result {
                inner.abort_connect(attempt, err);
            }
            result
        }))
    }

    /// Abandon a connection attempt. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let mut status = self.inner.lock_status();
        match &*status {
            Status::Connecting { cancel, .. } => {
                let _ = cancel.send(true);
                self.inner.set_status(&mut status, Status::Idle);
                true
            }
            Status::AwaitingApproval { conn, .. } => {
                let conn = *conn;
                self.inner.set_status(&mut status, Status::Idle);
                drop(status);
                if let Err(err) = self.inner.transport.disconnect(conn, "cancelled") {
                    debug!(%conn, "Pending connection already gone: {err}");
                }
                true
            }
            Status::Idle | Status::Connected { .. } => false,
        }
    }

    /// Leave the server. Returns whether a session was open.
    pub fn disconnect(&self, reason: &str) -> bool {
        let conn = match &*self.inner.lock_status() {
            Status::Connected { conn, .. } => *conn,
            _ => return false,
        };
        if let Err(err) = self.inner.transport.disconnect(conn, reason) {
            warn!(%conn, "Transport disconnect failed: {err}");
            self.inner.on_disconnected(conn, reason);
        }
        true
    }

    /// Connect when idle, otherwise cancel the attempt or leave the server.
    pub fn toggle(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<JoinHandle<Result<ConnectionId, ConnectError>>>, ConnectError> {
        match self.status() {
            ConnectionStatus::Idle => self.connect(address, username, password, None).map(Some),
            ConnectionStatus::Connected(_) => {
                self.disconnect("Bye!");
                Ok(None)
            }
            ConnectionStatus::Connecting | ConnectionStatus::AwaitingApproval(_) => {
                self.cancel();
                Ok(None)
            }
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Receiver that observes every status change.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        matches!(self.status(), ConnectionStatus::Connected(_))
    }

    /// Send `packet` to the server on its default route.
    pub fn send<P: Packet>(&self, packet: &P) -> Result<(), NetError> {
        self.inner.link()?.send(packet)
    }

    /// Send `packet` to the server on `route`.
    pub fn send_on<P: Packet>(&self, packet: &P, route: Route) -> Result<(), NetError> {
        self.inner.link()?.send_on(packet, route)
    }

    /// Post a chat line; the server stamps the author.
    pub fn send_chat(&self, message: &str) -> Result<(), NetError> {
        self.send(&ChatMessage {
            username: String::new(),
            message: message.to_owned(),
        })
    }

    /// Send a custom event to the server.
    pub fn send_custom_event(&self, event: &CustomEvent) -> Result<(), NetError> {
        self.send(event)
    }

    /// Send the event called `name` with `args`.
    pub fn trigger_event(&self, name: &str, args: Vec<Arg>) -> Result<(), NetError> {
        self.send_custom_event(&CustomEvent::new(event_hash(name), args))
    }

    /// Ask the server and wait for a `T`, using the configured timeout.
    pub async fn request<T: Packet, P: Packet>(&self, packet: &P) -> Result<T, NetError> {
        self.request_with_timeout(packet, self.inner.config.net.request_timeout())
            .await
    }

    /// Ask the server and wait up to `timeout` for a `T`.
    pub async fn request_with_timeout<T: Packet, P: Packet>(
        &self,
        packet: &P,
        timeout: Duration,
    ) -> Result<T, NetError> {
        self.request_on(packet, Route::REQUEST_RESPONSE, timeout)
            .await
    }

    /// Ask the server on `route` and wait up to `timeout` for a `T`.
    ///
    /// The answer comes back on the same channel.
    pub async fn request_on<T: Packet, P: Packet>(
        &self,
        packet: &P,
        route: Route,
        timeout: Duration,
    ) -> Result<T, NetError> {
        let link = self.inner.link()?;
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

    /// Answer requests for `P` coming from the server.
    pub fn on_request<P, R, F>(&self, handler: F)
    where
        P: Packet,
        R: Packet,
        F: Fn(P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .on_request(move |_origin: &Origin, packet: P| handler(packet));
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

    /// Half the round-trip time to the server, zero when not connected.
    pub fn latency(&self) -> Duration {
        self.inner.latency()
    }

    /// Run one simulation tick: queued actions first, then reconciliation.
    pub fn tick(&self, host: &mut H) -> TickReport {
        let tick = SimTick(self.inner.tick.fetch_add(1, Ordering::AcqRel) + 1);
        let drained = self.inner.actions.drain(host);
        if drained > 0 {
            trace!(tick = tick.0, drained, "Ran queued actions");
        }
        let clock = TickClock {
            tick,
            now: Instant::now(),
            latency: self.inner.latency(),
        };
        self.reconciler.tick(&self.inner.pool, host, &clock)
    }

    /// Last completed tick.
    pub fn current_tick(&self) -> SimTick {
        self.inner.current_tick()
    }

    /// Send syncs for every local entity. `full` adds the full-state blocks.
    pub fn sync_local(&self, host: &H, full: bool) -> Result<usize, NetError> {
        let link = self.inner.link()?;
        let mut sent = 0;
        for record in self.inner.pool.vehicles() {
            let sync = {
                let vehicle = lock(&record);
                if !vehicle.is_local {
                    continue;
                }
                capture_vehicle(host, &vehicle, full)
            };
            if let Some(sync) = sync {
                link.send(&sync)?;
                sent += 1;
            }
        }
        for record in self.inner.pool.peds() {
            let sync = {
                let ped = lock(&record);
                if !ped.is_local {
                    continue;
                }
                capture_ped(host, &ped, full)
            };
            if let Some(sync) = sync {
                link.send(&sync)?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Track a vehicle owned by this client.
    pub fn add_local_vehicle(
        &self,
        handle: H::Handle,
        model: ModelRef,
    ) -> Shared<SyncedVehicle<H::Handle>> {
        let vehicle = SyncedVehicle::local(
            new_entity_id(),
            self.inner.local_player_id,
            handle,
            model,
            Instant::now(),
        );
        self.inner.pool.insert_vehicle(vehicle)
    }

    /// Track the local player's own ped. Its id is the player id.
    pub fn add_local_player_ped(
        &self,
        handle: H::Handle,
        model: ModelRef,
    ) -> Shared<SyncedPed<H::Handle>> {
        let id = self.inner.local_player_id;
        self.inner
            .pool
            .insert_ped(SyncedPed::local(id, id, handle, model, Instant::now()))
    }

    /// Id of the local player.
    pub fn local_player_id(&self) -> PlayerId {
        self.inner.local_player_id
    }

    /// Players on the server, the local one included.
    pub fn players(&self) -> &PlayerList {
        &self.inner.players
    }

    /// Remote and local entities.
    pub fn pool(&self) -> &EntityPool<H::Handle> {
        &self.inner.pool
    }

    /// Actions waiting for the next tick.
    pub fn actions(&self) -> &ActionQueue<H> {
        &self.inner.actions
    }

    /// Dispatcher inbound frames go through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Settings in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<H: HostWorld> Inner<H> {
    fn lock_status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    fn set_status(&self, status: &mut Status, next: Status) {
        *status = next;
        self.status_tx.send_replace(status.public());
    }

    fn link(&self) -> Result<PeerLink, NetError> {
        match &*self.lock_status() {
            Status::Connected { conn, cipher } => Ok(PeerLink::sealed(
                Arc::clone(&self.transport),
                Origin::Connection(*conn),
                cipher.clone(),
            )),
            _ => Err(NetError::NotConnected),
        }
    }

    fn current_tick(&self) -> SimTick {
        SimTick(self.tick.load(Ordering::Acquire))
    }

    fn latency(&self) -> Duration {
        let conn = match &*self.lock_status() {
            Status::Connected { conn, .. } => *conn,
            _ => return Duration::ZERO,
        };
        self.transport
            .round_trip_time(conn)
            .map(|rtt| rtt / 2)
            .unwrap_or_default()
    }

    fn notify(&self, message: String) {
        self.actions.push(move |host: &mut H| host.notify(&message));
    }

    fn delete_later(&self, handles: Vec<H::Handle>) {
        if handles.is_empty() {
            return;
        }
        self.actions.push(move |host: &mut H| {
            for handle in handles {
                host.delete(handle);
            }
        });
    }

    fn clear_remote_entities(&self) {
        self.delete_later(self.pool.clear_remote());
    }

    async fn run_connect(
        &self,
        attempt: u64,
        request: ConnectRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ConnectionId, ConnectError> {
        let key = match request.public_key {
            Some(key) => key,
            None => {
                let timeout = self.config.net.public_key_timeout();
                let link = PeerLink::new(
                    Arc::clone(&self.transport),
                    Origin::Unconnected(request.remote),
                );
                debug!(remote = %request.remote, ?timeout, "Requesting server public key");
                let fetch = link.request::<PublicKeyResponse, _>(
                    self.dispatcher.correlator(),
                    self.dispatcher.context().clone(),
                    &PublicKeyRequest,
                    timeout,
                );
                tokio::select! {
                    response = fetch => match response {
                        Ok(response) => PublicKey::from(response),
                        Err(NetError::Timeout(_)) => {
                            return Err(ConnectError::PublicKeyTimeout(timeout))
                        }
                        Err(err) => return Err(err.into()),
                    },
                    _ = cancelled(&mut cancel) => return Err(ConnectError::Cancelled),
                }
            }
        };
        info!(fingerprint = %key.fingerprint(), "Got server public key");

        let handshake = self.build_handshake(&key, request.username, &request.password)?;
        self.send_handshake(attempt, request.remote, &handshake)
    }

    fn build_handshake(
        &self,
        key: &PublicKey,
        username: String,
        password: &str,
    ) -> Result<Handshake, ConnectError> {
        let mut session = lock(&self.session);
        session.set_server_public_key(key)?;
        let (aes_key_crypted, aes_iv_crypted) = session.crypted_session_key()?;
        Ok(Handshake {
            ped_id: self.local_player_id,
            username,
            mod_version: env!("CARGO_PKG_VERSION").to_owned(),
            schema_hash: compute_schema_hash(),
            aes_key_crypted,
            aes_iv_crypted,
            password_encrypted: session.encrypt_asymmetric(password.as_bytes())?,
        })
    }

    fn send_handshake(
        &self,
        attempt: u64,
        remote: SocketAddr,
        handshake: &Handshake,
    ) -> Result<ConnectionId, ConnectError> {
        let mut status = self.lock_status();
        match &*status {
            Status::Connecting { attempt: current, .. } if *current == attempt => {}
            _ => return Err(ConnectError::Cancelled),
        }
        let cipher = lock(&self.session).cipher();
        let conn = self.transport.connect(remote, encode_packet(handshake))?;
        self.set_status(&mut status, Status::AwaitingApproval { conn, cipher });
        debug!(%conn, %remote, "Handshake sent, awaiting approval");
        Ok(conn)
    }

    fn abort_connect(&self, attempt: u64, err: &ConnectError) {
        {
            let mut status = self.lock_status();
            if matches!(&*status, Status::Connecting { attempt: current, .. } if *current == attempt)
            {
                self.set_status(&mut status, Status::Idle);
            }
        }
        match err {
            ConnectError::Cancelled => info!(attempt, "Connection attempt cancelled"),
            err => {
                warn!(attempt, "Connection attempt failed: {err}");
                self.notify(format!("Connection failed: {err}"));
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { conn, remote, hail } => {
                self.on_connected(conn, remote, &hail)
            }
            TransportEvent::Disconnected { conn, reason } => self.on_disconnected(conn, &reason),
            TransportEvent::Message {
                conn,
                channel,
                payload,
            } => self.on_message(conn, channel, &payload),
            TransportEvent::Unconnected { from, payload } => {
                let outcome = self.dispatcher.dispatch(
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
            TransportEvent::ConnectionRequest { conn, remote, .. } => {
                debug!(%conn, %remote, "Refusing inbound connection");
                if let Err(err) = self.transport.deny(conn, "clients do not accept connections") {
                    debug!(%conn, "Deny failed: {err}");
                }
            }
        }
    }

    fn on_connected(&self, conn: ConnectionId, remote: SocketAddr, hail: &[u8]) {
        let mut status = self.lock_status();
        let cipher = match &*status {
            Status::AwaitingApproval {
                conn: pending,
                cipher,
            } if *pending == conn => Some(cipher.clone()),
            _ => None,
        };
        let Some(cipher) = cipher else {
            drop(status);
            debug!(%conn, "Closing approved connection that is no longer wanted");
            if let Err(err) = self.transport.disconnect(conn, "cancelled") {
                debug!(%conn, "Stale connection already gone: {err}");
            }
            return;
        };
        self.set_status(&mut status, Status::Connected { conn, cipher });
        drop(status);

        lock(&self.session).mark_ready();
        match decode_packet::<HandshakeSuccess>(hail, self.dispatcher.context()) {
            Ok(success) => {
                for player in success.players {
                    self.players.set(player.id, player.username);
                }
            }
            Err(err) => warn!(%conn, "Malformed approval hail: {err}"),
        }
        info!(%conn, %remote, players = self.players.len(), "Connected to server");
        self.notify("Connected.".to_owned());
    }

    fn on_disconnected(&self, conn: ConnectionId, reason: &str) {
        let was_connected = {
            let mut status = self.lock_status();
            let was_connected = match &*status {
                Status::AwaitingApproval { conn: current, .. } if *current == conn => false,
                Status::Connected { conn: current, .. } if *current == conn => true,
                _ => {
                    trace!(%conn, reason, "Ignoring disconnect of a connection that is not ours");
                    return;
                }
            };
            self.set_status(&mut status, Status::Idle);
            was_connected
        };

        lock(&self.session).regenerate();
        self.players.clear();
        self.clear_remote_entities();
        if was_connected {
            info!(%conn, reason, "Disconnected from server");
            self.notify(format!("Disconnected: {reason}"));
        } else {
            warn!(%conn, reason, "Connection rejected");
            self.notify(format!("Connection rejected: {reason}"));
        }
    }

    fn on_message(&self, conn: ConnectionId, channel: ConnectionChannel, payload: &[u8]) {
        let cipher = match &*self.lock_status() {
            Status::Connected {
                conn: current,
                cipher,
            } if *current == conn => cipher.clone(),
            _ => {
                trace!(%conn, ?channel, "Dropping frame from a connection that is not ours");
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

impl<H: HostWorld> Drop for Inner<H> {
    fn drop(&mut self) {
        self.transport.shutdown("client closed");
    }
}

fn register_handlers<H: HostWorld + 'static>(inner: &Arc<Inner<H>>) {
    let dispatcher = &inner.dispatcher;

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, packet: PlayerConnect| {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        info!(player = packet.ped_id, username = %packet.username, "Player connected");
        inner.notify(format!("{} connected.", packet.username));
        inner.players.set(packet.ped_id, packet.username);
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, packet: PlayerDisconnect| {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        let name = inner.players.remove(packet.ped_id);
        inner.delete_later(inner.pool.remove_owned_by(packet.ped_id));
        info!(player = packet.ped_id, "Player left");
        if let Some(name) = name {
            inner.notify(format!("{name} left."));
        }
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, packet: ChatMessage| {
        if let Some(inner) = weak.upgrade() {
            inner.notify(format!("{}: {}", packet.username, packet.message));
        }
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, event: CustomEvent| {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        if event.is_queued() {
            let handlers = inner.events.handlers_for(event.hash);
            inner.actions.push(move |_host: &mut H| {
                run_handlers(&handlers, EventSender::Server, &event);
            });
        } else {
            inner.events.invoke(EventSender::Server, &event);
        }
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, sync: VehicleSync| {
        if let Some(inner) = weak.upgrade() {
            inner
                .pool
                .apply_vehicle_sync(sync, inner.current_tick(), Instant::now());
        }
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    dispatcher.on(move |_origin: &Origin, sync: PedSync| {
        if let Some(inner) = weak.upgrade() {
            inner
                .pool
                .apply_ped_sync(sync, inner.current_tick(), Instant::now());
        }
        Ok(())
    });
}

async fn pump<H: HostWorld + 'static>(inner: Weak<Inner<H>>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
    debug!("Client event pump stopped");
}

/// Resolves once the attempt is cancelled or its status is replaced.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

fn resolve(address: &str) -> Result<SocketAddr, ConnectError> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConnectError::MalformedAddress(address.to_owned()))
}
