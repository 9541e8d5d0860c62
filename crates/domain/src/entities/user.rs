//! User references and presence vocabulary.
//!
//! User profiles are owned by the external user directory; this crate only
//! carries the minimal reference needed for display and identity checks.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Minimal reference to a user owned by the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
}

impl UserRef {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A user's presence as derived from their live connections.
///
/// `InGame { spectator: true }` reports a user whose only lobby
/// affiliations are spectator seats; they may still enter matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Presence {
    Offline,
    Online,
    InGame { spectator: bool },
}

impl Presence {
    /// Whether this presence blocks entering the matchmaking queue.
    pub fn blocks_matchmaking(&self) -> bool {
        matches!(self, Presence::InGame { spectator: false })
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Presence::Offline => write!(f, "offline"),
            Presence::Online => write!(f, "online"),
            Presence::InGame { spectator: false } => write!(f, "in-game"),
            Presence::InGame { spectator: true } => write!(f, "in-game (spectating)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playing_blocks_matchmaking_but_spectating_does_not() {
        assert!(Presence::InGame { spectator: false }.blocks_matchmaking());
        assert!(!Presence::InGame { spectator: true }.blocks_matchmaking());
        assert!(!Presence::Online.blocks_matchmaking());
        assert!(!Presence::Offline.blocks_matchmaking());
    }
}
