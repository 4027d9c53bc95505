//! Networking timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts used by the connect sequence and request/response exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetConfig {
    /// How long to wait for the server's public key before giving up.
    pub public_key_timeout_ms: u64,
    /// Default wait for the response to a request.
    pub request_timeout_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            public_key_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl NetConfig {
    /// Public key fetch timeout.
    pub fn public_key_timeout(&self) -> Duration {
        Duration::from_millis(self.public_key_timeout_ms)
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = NetConfig::default();
        assert_eq!(cfg.public_key_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
    }
}
