//! The server driven by a hand-rolled peer on the in-memory transport.

use coopsync_net::{
    compute_schema_hash, decode_packet, encode_packet, ChatMessage, ConnectionId, DecodeContext,
    Handshake, HandshakeSuccess, MemoryNetwork, Origin, PeerLink, ServerKeys, Session,
    SessionCipher, Transport, TransportEvent, TransportEvents,
};
use coopsync_server::{Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

struct Peer {
    transport: Arc<dyn Transport>,
    events: TransportEvents,
    session: Session,
}

impl Peer {
    fn new(network: &MemoryNetwork, server: &Server) -> Self {
        let (transport, events) = network.bind_any().unwrap();
        let mut session = Session::new();
        session.set_server_public_key(server.public_key()).unwrap();
        Self {
            transport,
            events,
            session,
        }
    }

    fn handshake(&self, ped_id: i32, username: &str) -> Vec<u8> {
        let (aes_key_crypted, aes_iv_crypted) = self.session.crypted_session_key().unwrap();
        encode_packet(&Handshake {
            ped_id,
            username: username.to_owned(),
            mod_version: "raw".to_owned(),
            schema_hash: compute_schema_hash(),
            aes_key_crypted,
            aes_iv_crypted,
            password_encrypted: self.session.encrypt_asymmetric(b"").unwrap(),
        })
    }

    async fn next(&mut self) -> TransportEvent {
        timeout(Duration::from_secs(10), self.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn join(
        &mut self,
        server: &Server,
        ped_id: i32,
        username: &str,
    ) -> (ConnectionId, HandshakeSuccess) {
        let payload = self.handshake(ped_id, username);
        self.transport.connect(server.local_addr(), payload).unwrap();
        match self.next().await {
            TransportEvent::Connected { conn, hail, .. } => {
                let hail = decode_packet(&hail, &DecodeContext::default()).unwrap();
                (conn, hail)
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }

    fn link(&self, conn: ConnectionId) -> PeerLink {
        PeerLink::sealed(
            self.transport.clone(),
            Origin::Connection(conn),
            self.session.cipher(),
        )
    }

    fn cipher(&self) -> SessionCipher {
        self.session.cipher()
    }
}

async fn server(network: &MemoryNetwork) -> Server {
    let (transport, events) = network.bind_any().unwrap();
    let keys = tokio::task::spawn_blocking(|| ServerKeys::generate(1024))
        .await
        .unwrap()
        .unwrap();
    Server::with_keys(ServerConfig::default(), keys, transport, events)
}

#[tokio::test]
async fn garbage_connect_payload_is_denied() {
    let network = MemoryNetwork::new();
    let server = server(&network).await;
    let mut peer = Peer::new(&network, &server);

    peer.transport
        .connect(server.local_addr(), vec![0xff, 0x00, 0x13])
        .unwrap();
    match peer.next().await {
        TransportEvent::Disconnected { reason, .. } => assert_eq!(reason, "Malformed handshake"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert!(server.players().is_empty());
}

#[tokio::test]
async fn chat_is_sealed_and_echoed() {
    let network = MemoryNetwork::new();
    let server = server(&network).await;
    let mut peer = Peer::new(&network, &server);
    let (conn, hail) = peer.join(&server, 3, "ana").await;
    assert!(hail.players.is_empty());

    peer.link(conn)
        .send(&ChatMessage {
            username: "spoofed".into(),
            message: "hi there".into(),
        })
        .unwrap();

    let payload = loop {
        match peer.next().await {
            TransportEvent::Message { payload, .. } => break payload,
            _ => continue,
        }
    };
    let frame = peer.cipher().open(&payload).unwrap();
    let chat: ChatMessage = decode_packet(&frame, &DecodeContext::default()).unwrap();
    assert_eq!(chat.username, "ana");
    assert_eq!(chat.message, "hi there");
}

#[tokio::test]
async fn kicked_player_is_dropped() {
    let network = MemoryNetwork::new();
    let server = server(&network).await;
    let mut peer = Peer::new(&network, &server);
    peer.join(&server, 8, "ana").await;

    for _ in 0..500 {
        if !server.players().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.players().len(), 1);

    assert!(server.kick(8, "Be nice"));
    assert!(!server.kick(9, "nobody"));
    match peer.next().await {
        TransportEvent::Disconnected { reason, .. } => assert_eq!(reason, "Be nice"),
        other => panic!("expected kick, got {other:?}"),
    }
    for _ in 0..500 {
        if server.players().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.players().is_empty());
}

#[tokio::test]
async fn simultaneous_joins_with_one_name_admit_one() {
    let network = MemoryNetwork::new();
    let server = server(&network).await;
    let mut first = Peer::new(&network, &server);
    let mut second = Peer::new(&network, &server);

    // Both requests are in flight before either is admitted.
    let payload = first.handshake(3, "ana");
    first.transport.connect(server.local_addr(), payload).unwrap();
    let payload = second.handshake(4, "Ana");
    second.transport.connect(server.local_addr(), payload).unwrap();

    let mut approved = 0;
    let mut refused = Vec::new();
    for event in [first.next().await, second.next().await] {
        match event {
            TransportEvent::Connected { .. } => approved += 1,
            TransportEvent::Disconnected { reason, .. } => refused.push(reason),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(refused.len(), 1);
    assert!(refused[0].contains("already taken"), "{}", refused[0]);
}
