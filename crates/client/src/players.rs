//! Players currently on the server.

use coopsync_core::PlayerId;
use coopsync_net::PlayerInfo;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Online players keyed by id.
#[derive(Debug, Default)]
pub struct PlayerList {
    players: RwLock<BTreeMap<PlayerId, String>>,
}

impl PlayerList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or rename a player.
    pub fn set(&self, id: PlayerId, username: impl Into<String>) {
        self.players
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, username.into());
    }

    /// Remove a player, returning its name.
    pub fn remove(&self, id: PlayerId) -> Option<String> {
        self.players
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
    }

    /// Name of a player.
    pub fn username(&self, id: PlayerId) -> Option<String> {
        self.players
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    /// Snapshot ordered by id.
    pub fn snapshot(&self) -> Vec<PlayerInfo> {
        self.players
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(&id, username)| PlayerInfo {
                id,
                username: username.clone(),
            })
            .collect()
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.players
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nobody is listed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everyone.
    pub fn clear(&self) {
        self.players
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
