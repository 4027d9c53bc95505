//! Server settings.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Settings of a server instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name.
    pub name: String,
    /// Address the transport listens on.
    pub listen: SocketAddr,
    /// Join password; empty means none.
    pub password: String,
    /// Most players online at once, pending joins included.
    pub max_players: usize,
    /// RSA modulus size of the server key.
    pub rsa_bits: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "coopsync server".to_owned(),
            listen: SocketAddr::from(([0, 0, 0, 0], 4499)),
            password: String::new(),
            max_players: 32,
            rsa_bits: coopsync_net::security::DEFAULT_RSA_BITS,
        }
    }
}

impl ServerConfig {
    /// Whether joining requires a password.
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert!(!cfg.has_password());
        assert_eq!(cfg.rsa_bits, 2048);
        assert_eq!(cfg.listen.port(), 4499);
    }
}
