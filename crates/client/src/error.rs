//! Connect sequence failures.

use coopsync_net::{CryptoError, NetError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Why a connection attempt did not reach the server.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A connection attempt is already running.
    #[error("already connecting")]
    AlreadyConnecting,
    /// The client is already connected.
    #[error("already connected")]
    AlreadyConnected,
    /// The address is not `host:port`.
    #[error("malformed address {0:?}")]
    MalformedAddress(String),
    /// The server did not send its public key in time.
    #[error("failed to retrieve the server's public key within {0:?}")]
    PublicKeyTimeout(Duration),
    /// The attempt was cancelled.
    #[error("connection attempt cancelled")]
    Cancelled,
    /// Session key material could not be prepared.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The transport refused the attempt.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Any other protocol failure.
    #[error(transparent)]
    Net(NetError),
}

impl From<NetError> for ConnectError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Cancelled => ConnectError::Cancelled,
            NetError::Crypto(err) => ConnectError::Crypto(err),
            NetError::Transport(err) => ConnectError::Transport(err),
            NetError::MalformedAddress(addr) => ConnectError::MalformedAddress(addr),
            other => ConnectError::Net(other),
        }
    }
}
