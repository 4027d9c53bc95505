//! In-process transport for tests and local demos.
//!
//! Endpoints bound on the same [`MemoryNetwork`] exchange frames through
//! their event channels directly. Every delivery mode behaves like reliable
//! ordered delivery.

use crate::channel::{ConnectionChannel, DeliveryMethod};
use crate::error::TransportError;
use crate::transport::{ConnectionId, Transport, TransportEvent, TransportEvents};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

const FIRST_EPHEMERAL_PORT: u16 = 40_000;

/// A set of in-process endpoints that can reach each other.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    round_trip_time: Duration,
}

struct Hub {
    endpoints: HashMap<SocketAddr, Arc<Endpoint>>,
    next_port: u16,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::with_round_trip_time(Duration::ZERO)
    }

    /// Create a network whose connections report `rtt` as round-trip time.
    pub fn with_round_trip_time(rtt: Duration) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                endpoints: HashMap::new(),
                next_port: FIRST_EPHEMERAL_PORT,
            })),
            round_trip_time: rtt,
        }
    }

    /// Bind an endpoint at `addr`. Port `0` picks a free port.
    pub fn bind(
        &self,
        addr: SocketAddr,
    ) -> Result<(Arc<MemoryTransport>, TransportEvents), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock_hub();

        let mut addr = addr;
        if addr.port() == 0 {
            loop {
                let candidate = SocketAddr::new(addr.ip(), hub.next_port);
                hub.next_port = hub.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
                if !hub.endpoints.contains_key(&candidate) {
                    addr = candidate;
                    break;
                }
            }
        } else if hub.endpoints.contains_key(&addr) {
            return Err(TransportError::AddrInUse(addr));
        }

        let endpoint = Arc::new(Endpoint {
            addr,
            events: tx,
            links: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        hub.endpoints.insert(addr, Arc::clone(&endpoint));
        debug!(%addr, "Memory endpoint bound");

        let transport = MemoryTransport {
            network: self.clone(),
            endpoint,
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), rx))
    }

    /// Bind an endpoint on the loopback address with a free port.
    pub fn bind_any(&self) -> Result<(Arc<MemoryTransport>, TransportEvents), TransportError> {
        self.bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    fn lock_hub(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn endpoint(&self, addr: SocketAddr) -> Option<Arc<Endpoint>> {
        self.lock_hub().endpoints.get(&addr).cloned()
    }

    fn unbind(&self, addr: SocketAddr) {
        self.lock_hub().endpoints.remove(&addr);
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Requested,
    Connected,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    remote: SocketAddr,
    remote_conn: ConnectionId,
    inbound: bool,
    state: LinkState,
}

struct Endpoint {
    addr: SocketAddr,
    events: mpsc::UnboundedSender<TransportEvent>,
    links: Mutex<HashMap<ConnectionId, Link>>,
    next_id: AtomicU64,
}

impl Endpoint {
    fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!(addr = %self.addr, "Event receiver dropped");
        }
    }

    fn with_links<R>(&self, f: impl FnOnce(&mut HashMap<ConnectionId, Link>) -> R) -> R {
        let mut links = self
            .links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut links)
    }

    fn get(&self, conn: ConnectionId) -> Option<Link> {
        self.with_links(|links| links.get(&conn).copied())
    }

    fn set_state(&self, conn: ConnectionId, state: LinkState) {
        self.with_links(|links| {
            if let Some(link) = links.get_mut(&conn) {
                link.state = state;
            }
        });
    }

    fn remove(&self, conn: ConnectionId) -> Option<Link> {
        self.with_links(|links| links.remove(&conn))
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: Arc<Endpoint>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn pending_inbound(&self, conn: ConnectionId) -> Result<Link, TransportError> {
        let link = self
            .endpoint
            .get(conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        if link.inbound && link.state == LinkState::Requested {
            Ok(link)
        } else {
            Err(TransportError::NotPending(conn))
        }
    }

    fn drop_link(&self, conn: ConnectionId, link: Link, reason: &str) {
        if let Some(peer) = self.network.endpoint(link.remote) {
            if peer.remove(link.remote_conn).is_some() {
                peer.emit(TransportEvent::Disconnected {
                    conn: link.remote_conn,
                    reason: reason.to_owned(),
                });
            }
        }
        debug!(%conn, remote = %link.remote, reason, "Memory connection closed");
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.endpoint.addr
    }

    fn connect(&self, remote: SocketAddr, payload: Vec<u8>) -> Result<ConnectionId, TransportError> {
        self.ensure_open()?;
        let conn = self.endpoint.allocate();

        let Some(peer) = self.network.endpoint(remote) else {
            debug!(%conn, %remote, "No memory endpoint to connect to");
            self.endpoint.emit(TransportEvent::Disconnected {
                conn,
                reason: format!("no endpoint listening at {remote}"),
            });
            return Ok(conn);
        };

        let remote_conn = peer.allocate();
        self.endpoint.with_links(|links| {
            links.insert(
                conn,
                Link {
                    remote,
                    remote_conn,
                    inbound: false,
                    state: LinkState::Requested,
                },
            )
        });
        peer.with_links(|links| {
            links.insert(
                remote_conn,
                Link {
                    remote: self.endpoint.addr,
                    remote_conn: conn,
                    inbound: true,
                    state: LinkState::Requested,
                },
            )
        });
        peer.emit(TransportEvent::ConnectionRequest {
            conn: remote_conn,
            remote: self.endpoint.addr,
            payload,
        });
        Ok(conn)
    }

    fn approve(&self, conn: ConnectionId, hail: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let link = self.pending_inbound(conn)?;
        self.endpoint.set_state(conn, LinkState::Connected);

        if let Some(peer) = self.network.endpoint(link.remote) {
            peer.set_state(link.remote_conn, LinkState::Connected);
            peer.emit(TransportEvent::Connected {
                conn: link.remote_conn,
                remote: self.endpoint.addr,
                hail,
            });
        }
        self.endpoint.emit(TransportEvent::Connected {
            conn,
            remote: link.remote,
            hail: Vec::new(),
        });
        Ok(())
    }

    fn deny(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let link = self.pending_inbound(conn)?;
        self.endpoint.remove(conn);
        self.drop_link(conn, link, reason);
        Ok(())
    }

    fn send(
        &self,
        target: Option<ConnectionId>,
        payload: Vec<u8>,
        delivery: DeliveryMethod,
        channel: ConnectionChannel,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let links: Vec<Link> = match target {
            Some(conn) => {
                let link = self
                    .endpoint
                    .get(conn)
                    .ok_or(TransportError::UnknownConnection(conn))?;
                if link.state != LinkState::Connected {
                    return Err(TransportError::NotEstablished(conn));
                }
                vec![link]
            }
            None => self.endpoint.with_links(|links| {
                links
                    .values()
                    .filter(|link| link.state == LinkState::Connected)
                    .copied()
                    .collect()
            }),
        };

        trace!(?channel, ?delivery, len = payload.len(), peers = links.len(), "Memory send");
        for link in links {
            if let Some(peer) = self.network.endpoint(link.remote) {
                peer.emit(TransportEvent::Message {
                    conn: link.remote_conn,
                    channel,
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn send_unconnected(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        match self.network.endpoint(to) {
            Some(peer) => peer.emit(TransportEvent::Unconnected {
                from: self.endpoint.addr,
                payload,
            }),
            None => trace!(%to, "Unconnected frame dropped, nobody listening"),
        }
        Ok(())
    }

    fn disconnect(&self, conn: ConnectionId, reason: &str) -> Result<(), TransportError> {
        let link = self
            .endpoint
            .remove(conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        self.endpoint.emit(TransportEvent::Disconnected {
            conn,
            reason: reason.to_owned(),
        });
        self.drop_link(conn, link, reason);
        Ok(())
    }

    fn round_trip_time(&self, conn: ConnectionId) -> Option<Duration> {
        self.endpoint
            .get(conn)
            .filter(|link| link.state == LinkState::Connected)
            .map(|_| self.network.round_trip_time)
    }

    fn shutdown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let conns: Vec<ConnectionId> = self.endpoint.with_links(|links| links.keys().copied().collect());
        for conn in conns {
            let _ = self.disconnect(conn, reason);
        }
        self.network.unbind(self.endpoint.addr);
        debug!(addr = %self.endpoint.addr, reason, "Memory endpoint shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(events: &mut TransportEvents) -> TransportEvent {
        events.try_recv().expect("expected an event")
    }

    fn connected_pair(
        net: &MemoryNetwork,
    ) -> (
        Arc<MemoryTransport>,
        TransportEvents,
        ConnectionId,
        Arc<MemoryTransport>,
        TransportEvents,
        ConnectionId,
    ) {
        let (server, mut server_events) = net.bind_any().unwrap();
        let (client, mut client_events) = net.bind_any().unwrap();

        let client_conn = client.connect(server.local_addr(), b"hello".to_vec()).unwrap();
        let server_conn = match next(&mut server_events) {
            TransportEvent::ConnectionRequest {
                conn,
                remote,
                payload,
            } => {
                assert_eq!(remote, client.local_addr());
                assert_eq!(payload, b"hello");
                conn
            }
            other => panic!("unexpected {other:?}"),
        };
        server.approve(server_conn, b"welcome".to_vec()).unwrap();
        assert!(matches!(
            next(&mut server_events),
            TransportEvent::Connected { conn, .. } if conn == server_conn
        ));
        match next(&mut client_events) {
            TransportEvent::Connected { conn, hail, .. } => {
                assert_eq!(conn, client_conn);
                assert_eq!(hail, b"welcome");
            }
            other => panic!("unexpected {other:?}"),
        }
        (
            server,
            server_events,
            server_conn,
            client,
            client_events,
            client_conn,
        )
    }

    #[test]
    fn connect_approve_and_exchange() {
        let net = MemoryNetwork::new();
        let (server, mut server_events, server_conn, client, mut client_events, client_conn) =
            connected_pair(&net);

        client
            .send(
                Some(client_conn),
                vec![1, 2, 3],
                DeliveryMethod::ReliableOrdered,
                ConnectionChannel::Chat,
            )
            .unwrap();
        assert_eq!(
            next(&mut server_events),
            TransportEvent::Message {
                conn: server_conn,
                channel: ConnectionChannel::Chat,
                payload: vec![1, 2, 3],
            }
        );

        server
            .send(
                None,
                vec![9],
                DeliveryMethod::Unreliable,
                ConnectionChannel::VehicleSync,
            )
            .unwrap();
        assert!(matches!(
            next(&mut client_events),
            TransportEvent::Message { payload, .. } if payload == vec![9]
        ));
    }

    #[test]
    fn sending_before_approval_fails() {
        let net = MemoryNetwork::new();
        let (server, _server_events) = net.bind_any().unwrap();
        let (client, _client_events) = net.bind_any().unwrap();
        let conn = client.connect(server.local_addr(), Vec::new()).unwrap();
        assert!(matches!(
            client.send(
                Some(conn),
                vec![0],
                DeliveryMethod::ReliableOrdered,
                ConnectionChannel::Default
            ),
            Err(TransportError::NotEstablished(_))
        ));
        assert!(matches!(
            client.approve(conn, Vec::new()),
            Err(TransportError::NotPending(_))
        ));
    }

    #[test]
    fn deny_reports_reason_to_requester() {
        let net = MemoryNetwork::new();
        let (server, mut server_events) = net.bind_any().unwrap();
        let (client, mut client_events) = net.bind_any().unwrap();

        let client_conn = client.connect(server.local_addr(), Vec::new()).unwrap();
        let TransportEvent::ConnectionRequest { conn, .. } = next(&mut server_events) else {
            panic!("expected a connection request");
        };
        server.deny(conn, "server full").unwrap();
        assert_eq!(
            next(&mut client_events),
            TransportEvent::Disconnected {
                conn: client_conn,
                reason: "server full".into(),
            }
        );
        assert!(server_events.try_recv().is_err());
    }

    #[test]
    fn connect_to_nobody_disconnects() {
        let net = MemoryNetwork::new();
        let (client, mut events) = net.bind_any().unwrap();
        let conn = client
            .connect("127.0.0.1:9".parse().unwrap(), Vec::new())
            .unwrap();
        assert!(matches!(
            next(&mut events),
            TransportEvent::Disconnected { conn: c, .. } if c == conn
        ));
    }

    #[test]
    fn unconnected_frames() {
        let net = MemoryNetwork::new();
        let (a, _a_events) = net.bind_any().unwrap();
        let (b, mut b_events) = net.bind_any().unwrap();

        a.send_unconnected(b.local_addr(), vec![4, 2]).unwrap();
        assert_eq!(
            next(&mut b_events),
            TransportEvent::Unconnected {
                from: a.local_addr(),
                payload: vec![4, 2],
            }
        );
        a.send_unconnected("127.0.0.1:9".parse().unwrap(), vec![1])
            .unwrap();
    }

    #[test]
    fn disconnect_notifies_both_sides() {
        let net = MemoryNetwork::with_round_trip_time(Duration::from_millis(40));
        let (server, mut server_events, server_conn, client, mut client_events, client_conn) =
            connected_pair(&net);
        assert_eq!(
            client.round_trip_time(client_conn),
            Some(Duration::from_millis(40))
        );

        client.disconnect(client_conn, "bye").unwrap();
        assert!(matches!(
            next(&mut client_events),
            TransportEvent::Disconnected { conn, .. } if conn == client_conn
        ));
        assert!(matches!(
            next(&mut server_events),
            TransportEvent::Disconnected { conn, reason } if conn == server_conn && reason == "bye"
        ));
        assert_eq!(server.round_trip_time(server_conn), None);
    }

    #[test]
    fn bind_conflicts_and_shutdown() {
        let net = MemoryNetwork::new();
        let addr: SocketAddr = "127.0.0.1:4499".parse().unwrap();
        let (first, _events) = net.bind(addr).unwrap();
        assert!(matches!(
            net.bind(addr),
            Err(TransportError::AddrInUse(_))
        ));
        first.shutdown("done");
        assert!(matches!(
            first.send_unconnected(addr, Vec::new()),
            Err(TransportError::Closed)
        ));
        assert!(net.bind(addr).is_ok());
    }
}
