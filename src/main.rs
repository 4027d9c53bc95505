//! coopsync - secure co-op session server and headless client
//!
//! `serve` hosts a session over QUIC, `join` connects a headless client
//! that prints what happens and sends stdin lines as chat, and `probe`
//! fetches a server's public key without joining.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, DEFAULT_CONFIG_PATH};
use coopsync_client::{ClientNetworking, ConnectionStatus};
use coopsync_net::{
    ConnectionChannel, DecodeContext, Dispatcher, Origin, PeerLink, PublicKey, PublicKeyRequest,
    PublicKeyResponse, QuicTransport, TransportEvent,
};
use coopsync_server::Server;
use coopsync_sync::MemoryWorld;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Client simulation rate of `join`.
const TICK_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(author, version, about = "Secure co-op session server and client", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a session
    Serve {
        /// Override the listen address from the config file
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Join a session and relay stdin as chat
    Join {
        /// Server address (`host:port`)
        address: String,
        /// Display name
        #[arg(short, long)]
        username: String,
        /// Join password
        #[arg(short, long, default_value = "")]
        password: String,
    },
    /// Print the fingerprint of a server's public key
    Probe {
        /// Server address (`host:port`)
        address: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load_from_path(&args.config);
    info!("Starting coopsync v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Join {
            address,
            username,
            password,
        } => join(config, &address, &username, &password).await,
        Command::Probe { address } => probe(config, address).await,
    }
}

async fn serve(mut config: AppConfig, listen: Option<SocketAddr>) -> Result<()> {
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    let (transport, events) = QuicTransport::bind(config.server.listen)
        .with_context(|| format!("failed to listen on {}", config.server.listen))?;
    info!(bits = config.server.rsa_bits, "Generating server key");
    let server = Server::start(config.server, transport, events).await?;
    info!(
        addr = %server.local_addr(),
        fingerprint = %server.public_key().fingerprint(),
        "Ready; press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    server.shutdown("Server closed");
    // Give the transport a moment to flush close frames.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn join(config: AppConfig, address: &str, username: &str, password: &str) -> Result<()> {
    let (transport, events) = QuicTransport::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    let client: ClientNetworking<MemoryWorld> =
        ClientNetworking::new(transport, events, config.client);
    let mut host = MemoryWorld::new();

    client.connect(address, username, password, None)?.await??;
    let mut status = client.status_changes();
    let mut ticks = tokio::time::interval(TICK_INTERVAL);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                client.tick(&mut host);
                for message in &host.notifications[printed..] {
                    println!("{message}");
                }
                printed = host.notifications.len();
            }
            changed = status.changed() => {
                if changed.is_err() || *status.borrow() == ConnectionStatus::Idle {
                    // One more tick to print the reason.
                    client.tick(&mut host);
                    for message in &host.notifications[printed..] {
                        println!("{message}");
                    }
                    return Ok(());
                }
            }
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    if let Err(err) = client.send_chat(&line) {
                        warn!("Chat not sent: {err}");
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect("Quit");
    Ok(())
}

async fn probe(config: AppConfig, address: SocketAddr) -> Result<()> {
    let (transport, mut events) = QuicTransport::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    let dispatcher = Dispatcher::new(DecodeContext::default());
    let correlator = dispatcher.correlator().clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let TransportEvent::Unconnected { from, payload } = event {
                dispatcher.dispatch(
                    Origin::Unconnected(from),
                    ConnectionChannel::Default,
                    &payload,
                );
            }
        }
    });

    let link = PeerLink::new(transport, Origin::Unconnected(address));
    let response: PublicKeyResponse = link
        .request(
            &correlator,
            DecodeContext::default(),
            &PublicKeyRequest,
            config.client.net.public_key_timeout(),
        )
        .await
        .with_context(|| format!("no public key from {address}"))?;
    let key = PublicKey::from(response);
    println!(
        "{address}: {}-bit RSA key, fingerprint {}",
        key.modulus.len() * 8,
        key.fingerprint()
    );
    Ok(())
}
