//! QUIC transport adapter using quinn.
//!
//! One endpoint both accepts and dials. Every frame is written as
//! `[kind: u8][channel: u8][len: u32][payload]`:
//!
//! - reliable ordered frames share one long-lived unidirectional stream per
//!   connection, together with the connection control frames;
//! - reliable unordered frames each get their own unidirectional stream;
//! - unreliable frames are datagrams, falling back to a stream when too large.
//!
//! QUIC has no connectionless messages, so unconnected frames travel over a
//! plain QUIC connection that has not (yet) been requested as a transport
//! connection. A later [`Transport::connect`] to the same address reuses it.
//! TLS uses a self-signed certificate that clients do not verify; the
//! session cipher provides confidentiality for application frames.

use crate::channel::{ConnectionChannel, DeliveryMethod};
use crate::error::TransportError;
use crate::transport::{ConnectionId, Transport, TransportEvent, TransportEvents};
use anyhow::{anyhow, Context, Result};
use quinn::{ClientConfig, Endpoint, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const ALPN: &[u8] = b"coopsync";
const SERVER_NAME: &str = "localhost";
const HEADER_LEN: usize = 6;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const CLOSE_NORMAL: u32 = 0;
const CLOSE_DENIED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Message = 0,
    Unconnected = 1,
    ConnectRequest = 2,
    Approve = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameKind::Message),
            1 => Ok(FrameKind::Unconnected),
            2 => Ok(FrameKind::ConnectRequest),
            3 => Ok(FrameKind::Approve),
            _ => Err(anyhow!("Invalid frame kind: {}", value)),
        }
    }
}

fn encode_frame(kind: FrameKind, channel: ConnectionChannel, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(kind as u8);
    frame.push(channel as u8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn frame_len(header: &[u8]) -> usize {
    u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    /// QUIC connection only, used for unconnected frames.
    Raw,
    /// Connect request sent or received, awaiting approval.
    Requested,
    /// Approved transport connection.
    Connected,
}

enum Outgoing {
    Frame {
        bytes: Vec<u8>,
        delivery: DeliveryMethod,
    },
    Close {
        code: u32,
        reason: String,
    },
}

struct Peer {
    remote: SocketAddr,
    /// Whether this side sent the connect request.
    requester: bool,
    state: PeerState,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    connection: Option<quinn::Connection>,
    /// Messages that overtook the approval frame.
    held: Vec<(ConnectionChannel, Vec<u8>)>,
}

#[derive(Default)]
struct Peers {
    by_id: HashMap<ConnectionId, Peer>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
}

impl Peers {
    fn remove(&mut self, conn: ConnectionId) -> Option<Peer> {
        let peer = self.by_id.remove(&conn)?;
        if self.by_addr.get(&peer.remote) == Some(&conn) {
            self.by_addr.remove(&peer.remote);
        }
        Some(peer)
    }
}

struct Inner {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    runtime: Handle,
    events: mpsc::UnboundedSender<TransportEvent>,
    peers: Mutex<Peers>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// [`Transport`] over QUIC.
pub struct QuicTransport {
    inner: Arc<Inner>,
}

impl QuicTransport {
    /// Bind an endpoint at `addr` that accepts and dials connections.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<(Arc<Self>, TransportEvents), TransportError> {
        let runtime = Handle::try_current().context("QUIC transport needs a tokio runtime")?;
        let endpoint = build_endpoint(addr)?;
        let local_addr = endpoint.local_addr().context("Failed to read local address")?;
        info!("QUIC endpoint bound to {}", local_addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            endpoint,
            local_addr,
            runtime,
            events: tx,
            peers: Mutex::new(Peers::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        inner.runtime.spawn(Arc::clone(&inner).accept_loop());
        Ok((Arc::new(Self { inner }), rx))
    }
}

fn build_endpoint(addr: SocketAddr) -> Result<Endpoint> {
    // Install default crypto provider if not already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (cert, key) = generate_self_signed_cert()?;
    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Failed to build rustls ServerConfig")?;
    server_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut client_crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    client_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut transport_config = quinn::TransportConfig::default();
    transport_config.keep_alive_interval(Some(Duration::from_secs(5)));
    transport_config.max_idle_timeout(Some(Duration::from_secs(30).try_into()?));
    let transport_config = Arc::new(transport_config);

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .context("Failed to create QuicServerConfig")?,
    ));
    server_config.transport_config(Arc::clone(&transport_config));

    let mut client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
            .context("Failed to create QuicClientConfig")?,
    ));
    client_config.transport_config(transport_config);

    let mut endpoint =
        Endpoint::server(server_config, addr).context("Failed to bind QUIC endpoint")?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

impl Inner {
    fn lock_peers(&self) -> MutexGuard<'_, Peers> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Transport event receiver dropped");
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn register(
        &self,
        remote: SocketAddr,
        requester: bool,
        state: PeerState,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        connection: Option<quinn::Connection>,
    ) -> ConnectionId {
        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut peers = self.lock_peers();
        peers.by_addr.insert(remote, conn);
        peers.by_id.insert(
            conn,
            Peer {
                remote,
                requester,
                state,
                outgoing,
                connection,
                held: Vec::new(),
            },
        );
        conn
    }

    fn push(&self, conn: ConnectionId, outgoing: Outgoing) -> Result<(), TransportError> {
        let peers = self.lock_peers();
        let peer = peers
            .by_id
            .get(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        if peer.outgoing.send(outgoing).is_err() {
            trace!(%conn, "Writer already stopped");
        }
        Ok(())
    }

    /// Open a QUIC connection to `remote` in the background.
    fn dial(
        self: &Arc<Self>,
        remote: SocketAddr,
        requester: bool,
        state: PeerState,
    ) -> Result<ConnectionId, TransportError> {
        let connecting = self
            .endpoint
            .connect(remote, SERVER_NAME)
            .context("Failed to initiate connection")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = self.register(remote, requester, state, tx, None);
        debug!(%conn, %remote, "Dialing");

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            match connecting.await {
                Ok(connection) => {
                    if inner.attach(conn, &connection) {
                        inner.spawn_io(conn, connection, rx);
                    } else {
                        connection.close(CLOSE_NORMAL.into(), b"abandoned");
                    }
                }
                Err(err) => inner.peer_closed(conn, format!("connection failed: {err}")),
            }
        });
        Ok(conn)
    }

    fn attach(&self, conn: ConnectionId, connection: &quinn::Connection) -> bool {
        match self.lock_peers().by_id.get_mut(&conn) {
            Some(peer) => {
                peer.connection = Some(connection.clone());
                true
            }
            None => false,
        }
    }

    fn spawn_io(
        self: &Arc<Self>,
        conn: ConnectionId,
        connection: quinn::Connection,
        rx: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        self.runtime.spawn(write_loop(connection.clone(), rx));
        self.runtime
            .spawn(Arc::clone(self).read_loop(conn, connection));
    }

    async fn accept_loop(self: Arc<Self>) {
        while let Some(incoming) = self.endpoint.accept().await {
            let inner = Arc::clone(&self);
            self.runtime.spawn(async move {
                match incoming.await {
                    Ok(connection) => {
                        let remote = connection.remote_address();
                        let (tx, rx) = mpsc::unbounded_channel();
                        let conn = inner.register(
                            remote,
                            false,
                            PeerState::Raw,
                            tx,
                            Some(connection.clone()),
                        );
                        debug!(%conn, %remote, "Accepted QUIC connection");
                        inner.spawn_io(conn, connection, rx);
                    }
                    Err(err) => debug!("Incoming QUIC handshake failed: {err}"),
                }
            });
        }
        debug!("QUIC accept loop stopped");
    }

    async fn read_loop(self: Arc<Self>, conn: ConnectionId, connection: quinn::Connection) {
        let reason = loop {
            tokio::select! {
                stream = connection.accept_uni() => match stream {
                    Ok(recv) => {
                        let inner = Arc::clone(&self);
                        self.runtime.spawn(async move { inner.read_stream(conn, recv).await });
                    }
                    Err(err) => break close_reason(&err),
                },
                datagram = connection.read_datagram() => match datagram {
                    Ok(bytes) => self.handle_datagram(conn, &bytes),
                    Err(err) => break close_reason(&err),
                },
            }
        };
        self.peer_closed(conn, reason);
    }

    async fn read_stream(&self, conn: ConnectionId, mut recv: quinn::RecvStream) {
        loop {
            let mut header = [0u8; HEADER_LEN];
            if let Err(err) = recv.read_exact(&mut header).await {
                trace!(%conn, "Stream ended: {err}");
                return;
            }
            let len = frame_len(&header);
            if len > MAX_FRAME_LEN {
                warn!(%conn, len, "Oversized frame, dropping stream");
                return;
            }
            let mut payload = vec![0u8; len];
            if let Err(err) = recv.read_exact(&mut payload).await {
                debug!(%conn, "Stream ended mid-frame: {err}");
                return;
            }
            self.handle_frame(conn, header[0], header[1], payload);
        }
    }

    fn handle_datagram(&self, conn: ConnectionId, bytes: &[u8]) {
        if bytes.len() < HEADER_LEN || frame_len(bytes) != bytes.len() - HEADER_LEN {
            debug!(%conn, len = bytes.len(), "Malformed datagram");
            return;
        }
        self.handle_frame(conn, bytes[0], bytes[1], bytes[HEADER_LEN..].to_vec());
    }

    fn handle_frame(&self, conn: ConnectionId, kind: u8, channel: u8, payload: Vec<u8>) {
        let kind = match FrameKind::try_from(kind) {
            Ok(kind) => kind,
            Err(err) => {
                debug!(%conn, "{err}");
                return;
            }
        };

        let mut peers = self.lock_peers();
        let Some(peer) = peers.by_id.get_mut(&conn) else {
            return;
        };
        let remote = peer.remote;

        match kind {
            FrameKind::Unconnected => self.emit(TransportEvent::Unconnected {
                from: remote,
                payload,
            }),
            FrameKind::ConnectRequest => {
                if peer.state == PeerState::Raw {
                    peer.state = PeerState::Requested;
                    peer.requester = false;
                    self.emit(TransportEvent::ConnectionRequest {
                        conn,
                        remote,
                        payload,
                    });
                } else {
                    debug!(%conn, state = ?peer.state, "Ignoring repeated connect request");
                }
            }
            FrameKind::Approve => {
                if peer.requester && peer.state == PeerState::Requested {
                    peer.state = PeerState::Connected;
                    self.emit(TransportEvent::Connected {
                        conn,
                        remote,
                        hail: payload,
                    });
                    for (channel, payload) in std::mem::take(&mut peer.held) {
                        self.emit(TransportEvent::Message {
                            conn,
                            channel,
                            payload,
                        });
                    }
                }
            }
            FrameKind::Message => {
                let channel = match ConnectionChannel::try_from(channel) {
                    Ok(channel) => channel,
                    Err(err) => {
                        debug!(%conn, "{err}");
                        return;
                    }
                };
                match peer.state {
                    PeerState::Connected => self.emit(TransportEvent::Message {
                        conn,
                        channel,
                        payload,
                    }),
                    PeerState::Requested if peer.requester => peer.held.push((channel, payload)),
                    state => trace!(%conn, ?state, "Dropping message outside a connection"),
                }
            }
        }
    }

    fn peer_closed(&self, conn: ConnectionId, reason: String) {
        let removed = self.lock_peers().remove(conn);
        if let Some(peer) = removed {
            debug!(%conn, remote = %peer.remote, %reason, "QUIC connection closed");
            if matches!(peer.state, PeerState::Requested | PeerState::Connected) {
                self.emit(TransportEvent::Disconnected { conn, reason });
            }
        }
    }
}

async fn write_loop(connection: quinn::Connection, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    let mut ordered: Option<quinn::SendStream> = None;
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Close { code, reason } => {
                if let Some(stream) = ordered.as_mut() {
                    let _ = stream.finish();
                }
                connection.close(code.into(), reason.as_bytes());
                return;
            }
            Outgoing::Frame { bytes, delivery } => {
                if let Err(err) = write_frame(&connection, &mut ordered, bytes, delivery).await {
                    debug!(remote = %connection.remote_address(), "QUIC write failed: {err:#}");
                    if connection.close_reason().is_some() {
                        return;
                    }
                }
            }
        }
    }
}

async fn write_frame(
    connection: &quinn::Connection,
    ordered: &mut Option<quinn::SendStream>,
    bytes: Vec<u8>,
    delivery: DeliveryMethod,
) -> Result<()> {
    match delivery {
        DeliveryMethod::ReliableOrdered => {
            let stream = match ordered.take() {
                Some(stream) => ordered.insert(stream),
                None => ordered.insert(
                    connection
                        .open_uni()
                        .await
                        .context("Failed to open ordered stream")?,
                ),
            };
            if let Err(err) = stream.write_all(&bytes).await {
                *ordered = None;
                return Err(err).context("Failed to write ordered frame");
            }
        }
        DeliveryMethod::ReliableUnordered => send_on_new_stream(connection, &bytes).await?,
        DeliveryMethod::Unreliable => {
            let fits = connection
                .max_datagram_size()
                .is_some_and(|max| bytes.len() <= max);
            if fits {
                connection
                    .send_datagram(bytes.into())
                    .context("Failed to send datagram")?;
            } else {
                send_on_new_stream(connection, &bytes).await?;
            }
        }
    }
    Ok(())
}

async fn send_on_new_stream(connection: &quinn::Connection, bytes: &[u8]) -> Result<()> {
    let mut stream = connection
        .open_uni()
        .await
        .context("Failed to open unidirectional stream")?;
    stream.write_all(bytes).await.context("Failed to write frame")?;
    stream.finish().context("Failed to finish stream")?;
    Ok(())
}

fn close_reason(err: &quinn::ConnectionError) -> String {
    match err {
        quinn::ConnectionError::ApplicationClosed(close) => {
            String::from_utf8_lossy(&close.reason).into_owned()
        }
        other => other.to_string(),
    }
}

impl Transport for QuicTransport {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    fn connect(&self, remote: SocketAddr, payload: Vec<u8>) -> Result<ConnectionId, TransportError> {
        self.inner.ensure_open()?;
        let reusable = {
            let mut peers = self.inner.lock_peers();
            let existing = peers.by_addr.get(&remote).copied();
            match existing.and_then(|conn| peers.by_id.get_mut(&conn).map(|peer| (conn, peer))) {
                Some((conn, peer)) if peer.state == PeerState::Raw => {
                    peer.state = PeerState::Requested;
                    peer.requester = true;
                    Some(conn)
                }
                _ => None,
            }
        };
        let conn = match reusable {
            Some(conn) => conn,
            None => self.inner.dial(remote, true, PeerState::Requested)?,
        };
        let frame = encode_frame(FrameKind::ConnectRequest, ConnectionChannel::Default, &payload);
        self.inner.push(
            conn,
            Outgoing::Frame {
                bytes: frame,
                delivery: DeliveryMethod::ReliableOrdered,
            },
        )?;
        Ok(conn)
    }

    fn approve(&self, conn: ConnectionId, hail: Vec<u8>) -> Result<(), TransportError> {
        self.inner.ensure_open()?;
        let remote = {
            let mut peers = self.inner.lock_peers();
            let peer = peers
                .by_id
                .get_mut(&conn)
                .ok_or(TransportError::UnknownConnection(conn))?;
            if peer.requester || peer.state != PeerState::Requested {
                return Err(TransportError::NotPending(conn));
            }
            peer.state = PeerState::Connected;
            let frame = encode_frame(FrameKind::Approve, ConnectionChannel::Default, &hail);
            let _ = peer.outgoing.send(Outgoing::Frame {
                bytes: frame,
                delivery: DeliveryMethod::ReliableOrdered,
            });
            peer.remote
        };
        self.inner.emit(TransportEvent::Connected {
            conn,
            remote,
            hail: Vec::new(),
        });
        Ok(())
    }

    fn deny(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError> {
        self.inner.ensure_open()?;
        let mut peers = self.inner.lock_peers();
        let pending = peers
            .by_id
            .get(&conn)
            .map(|peer| !peer.requester && peer.state == PeerState::Requested)
            .ok_or(TransportError::UnknownConnection(conn))?;
        if !pending {
            return Err(TransportError::NotPending(conn));
        }
        if let Some(peer) = peers.remove(conn) {
            let _ = peer.outgoing.send(Outgoing::Close {
                code: CLOSE_DENIED,
                reason: reason.to_owned(),
            });
        }
        Ok(())
    }

    fn send(
        &self,
        target: Option<ConnectionId>,
        payload: Vec<u8>,
        delivery: DeliveryMethod,
        channel: ConnectionChannel,
    ) -> Result<(), TransportError> {
        self.inner.ensure_open()?;
        let frame = encode_frame(FrameKind::Message, channel, &payload);
        let peers = self.inner.lock_peers();
        let targets: Vec<&Peer> = match target {
            Some(conn) => {
                let peer = peers
                    .by_id
                    .get(&conn)
                    .ok_or(TransportError::UnknownConnection(conn))?;
                if peer.state != PeerState::Connected {
                    return Err(TransportError::NotEstablished(conn));
                }
                vec![peer]
            }
            None => peers
                .by_id
                .values()
                .filter(|peer| peer.state == PeerState::Connected)
                .collect(),
        };
        trace!(?channel, ?delivery, len = payload.len(), peers = targets.len(), "QUIC send");
        for peer in targets {
            let _ = peer.outgoing.send(Outgoing::Frame {
                bytes: frame.clone(),
                delivery,
            });
        }
        Ok(())
    }

    fn send_unconnected(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError> {
        self.inner.ensure_open()?;
        let existing = self.inner.lock_peers().by_addr.get(&to).copied();
        let conn = match existing {
            Some(conn) => conn,
            None => self.inner.dial(to, false, PeerState::Raw)?,
        };
        let frame = encode_frame(FrameKind::Unconnected, ConnectionChannel::Default, &payload);
        self.inner.push(
            conn,
            Outgoing::Frame {
                bytes: frame,
                delivery: DeliveryMethod::ReliableUnordered,
            },
        )
    }

    fn disconnect(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError> {
        let peer = self
            .inner
            .lock_peers()
            .remove(conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        let _ = peer.outgoing.send(Outgoing::Close {
            code: CLOSE_NORMAL,
            reason: reason.to_owned(),
        });
        if matches!(peer.state, PeerState::Requested | PeerState::Connected) {
            self.inner.emit(TransportEvent::Disconnected {
                conn,
                reason: reason.to_owned(),
            });
        }
        Ok(())
    }

    fn round_trip_time(&self, conn: ConnectionId) -> Option<Duration> {
        let peers = self.inner.lock_peers();
        let peer = peers.by_id.get(&conn)?;
        if peer.state != PeerState::Connected {
            return None;
        }
        peer.connection.as_ref().map(quinn::Connection::rtt)
    }

    fn shutdown(&self, reason: &str) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let peers = std::mem::take(&mut *self.inner.lock_peers());
        for (conn, peer) in peers.by_id {
            if matches!(peer.state, PeerState::Requested | PeerState::Connected) {
                self.inner.emit(TransportEvent::Disconnected {
                    conn,
                    reason: reason.to_owned(),
                });
            }
        }
        self.inner
            .endpoint
            .close(CLOSE_NORMAL.into(), reason.as_bytes());
        info!(reason, "QUIC endpoint shut down");
    }
}

/// Generate a self-signed certificate for the endpoint.
fn generate_self_signed_cert() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    debug!("Generating self-signed certificate");

    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
        .context("Failed to generate certificate")?;

    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    let cert_der = CertificateDer::from(cert.cert);

    Ok((cert_der, key))
}

/// Certificate verifier that accepts any server certificate.
///
/// Peer authenticity comes from the RSA key exchange, not from TLS.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
