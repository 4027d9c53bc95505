//! Admission of join requests.

use crate::config::ServerConfig;
use coopsync_net::packets::MAX_USERNAME_LEN;
use coopsync_net::{compute_schema_hash, Handshake, PlayerInfo, ServerKeys, SessionCipher};
use thiserror::Error;

/// Why a join request was refused. The message is sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The connect payload is not a handshake.
    #[error("Malformed handshake")]
    Malformed,
    /// Client and server were built from different protocol definitions.
    #[error("Protocol mismatch (server {server:016x}, client {client:016x})")]
    SchemaMismatch {
        /// Hash of this build.
        server: u64,
        /// Hash sent by the client.
        client: u64,
    },
    /// Username is blank.
    #[error("Username is empty")]
    EmptyUsername,
    /// Username exceeds the length limit.
    #[error("Username is longer than {MAX_USERNAME_LEN} characters")]
    UsernameTooLong,
    /// Someone online already uses the name.
    #[error("Username {0:?} is already taken")]
    UsernameTaken(String),
    /// Player id is not positive.
    #[error("Invalid player id")]
    InvalidPlayerId,
    /// Someone online already uses the id.
    #[error("Player id is already in use")]
    PlayerIdTaken,
    /// No free slot.
    #[error("Server is full")]
    ServerFull,
    /// Session key or IV did not decrypt to valid key material.
    #[error("Invalid session key")]
    InvalidSessionKey,
    /// Password missing or wrong.
    #[error("Wrong password")]
    WrongPassword,
}

/// An accepted join request.
#[derive(Debug)]
pub struct Admission {
    /// The joining player.
    pub player: PlayerInfo,
    /// Cipher for the player's connection.
    pub cipher: SessionCipher,
}

/// Check `handshake` on its own and recover its session.
///
/// Runs the RSA decryptions, so call it without holding the client table.
/// Slot and uniqueness checks are left to [`check_roster`].
pub fn verify(
    handshake: &Handshake,
    keys: &ServerKeys,
    config: &ServerConfig,
) -> Result<Admission, Rejection> {
    let schema = compute_schema_hash();
    if handshake.schema_hash != schema {
        return Err(Rejection::SchemaMismatch {
            server: schema,
            client: handshake.schema_hash,
        });
    }

    let username = handshake.username.trim();
    if username.is_empty() {
        return Err(Rejection::EmptyUsername);
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(Rejection::UsernameTooLong);
    }
    if handshake.ped_id <= 0 {
        return Err(Rejection::InvalidPlayerId);
    }

    let cipher = keys
        .accept_session(&handshake.aes_key_crypted, &handshake.aes_iv_crypted)
        .map_err(|_| Rejection::InvalidSessionKey)?;

    if config.has_password() {
        let password = keys
            .decrypt(&handshake.password_encrypted)
            .map_err(|_| Rejection::WrongPassword)?;
        if !password_matches(&password, &config.password) {
            return Err(Rejection::WrongPassword);
        }
    }

    Ok(Admission {
        player: PlayerInfo {
            id: handshake.ped_id,
            username: username.to_owned(),
        },
        cipher,
    })
}

/// Check that `player` can take a slot next to `online`.
///
/// `online` lists every player holding a slot, pending joins included.
pub fn check_roster<'a>(
    player: &PlayerInfo,
    config: &ServerConfig,
    online: impl IntoIterator<Item = &'a PlayerInfo>,
) -> Result<(), Rejection> {
    let mut slots = 0;
    for other in online {
        if other.username.eq_ignore_ascii_case(&player.username) {
            return Err(Rejection::UsernameTaken(player.username.clone()));
        }
        if other.id == player.id {
            return Err(Rejection::PlayerIdTaken);
        }
        slots += 1;
    }
    if slots >= config.max_players {
        return Err(Rejection::ServerFull);
    }
    Ok(())
}

/// Compares digests so the time taken does not depend on where the bytes differ.
fn password_matches(sent: &[u8], expected: &str) -> bool {
    // `blake3::Hash` equality is constant time.
    blake3::hash(sent) == blake3::hash(expected.as_bytes())
}
