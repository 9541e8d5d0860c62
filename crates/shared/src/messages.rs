//! WebSocket message types for engine/client communication.
//!
//! These types are used by both the engine (sending `ServerMessage`,
//! receiving `ClientMessage`) and clients (the reverse). Both unions are
//! closed: every dispatch site can match exhaustively.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Removing variants requires major version bump
//! - Renaming variants is a breaking change

use serde::{Deserialize, Serialize};

use rallyd_domain::{LobbyId, Presence, UserId, UserRef};

use crate::dto::{GameFrame, LobbyDto, PaddleMove, Winner};

// =============================================================================
// Client Messages (Client → Engine)
// =============================================================================

/// Messages from client to engine.
///
/// Lobby and matchmaking commands travel over HTTP; the socket only carries
/// liveness probes and in-game input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Heartbeat ping
    Heartbeat,
    /// Paddle input for the running game this connection is bound to
    GameInput { mv: PaddleMove },
}

// =============================================================================
// Server Messages (Engine → Client)
// =============================================================================

/// Messages from engine to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A lobby was created with the recipient as a participant
    LobbyCreated { lobby: LobbyDto },
    /// The recipient was invited into a lobby
    InviteReceived { lobby_id: LobbyId, from: UserRef },
    /// A user was seated as the invited second player
    PlayerInvited { lobby_id: LobbyId, user: UserRef },
    /// The invited player declined; the lobby survives
    InviteDeclined { lobby_id: LobbyId, user: UserRef },
    /// A player seat was filled
    PlayerJoined { lobby_id: LobbyId, user: UserRef },
    /// A spectator seat was filled
    SpectatorJoined { lobby_id: LobbyId, user: UserRef },
    /// A player seat was vacated; the lobby survives
    PlayerLeft { lobby_id: LobbyId, user: UserRef },
    /// A spectator seat was vacated
    SpectatorLeft { lobby_id: LobbyId, user: UserRef },
    /// The lobby was removed along with every seat
    LobbyDisbanded { lobby_id: LobbyId },
    /// A player picked a paddle color
    ColorSet {
        lobby_id: LobbyId,
        user_id: UserId,
        color: String,
    },
    /// A player flagged themselves ready
    PlayerReady { lobby_id: LobbyId, user_id: UserId },
    /// Matchmaking acknowledgment: the recipient is waiting in the queue
    MatchmakingWaiting,
    /// The queue paired the recipient into a fresh lobby
    MatchFound { lobby: LobbyDto },
    /// Both players are ready and the game loop is running
    GameStarted { lobby_id: LobbyId },
    /// One authoritative engine frame
    GameState { lobby_id: LobbyId, frame: GameFrame },
    /// The game finished; scores are final
    GameEnded {
        lobby_id: LobbyId,
        winner: Winner,
        score1: u32,
        score2: u32,
    },
    /// A user's presence changed
    PresenceChanged { user_id: UserId, presence: Presence },
    /// The credential behind this connection expired; no payloads follow
    CredentialExpired,
    /// Command frame could not be processed
    Error { code: String, message: String },
    /// Heartbeat reply
    Pong,
}

impl ServerMessage {
    /// Stable tag for logging and delivery-count metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::LobbyCreated { .. } => "lobby_created",
            ServerMessage::InviteReceived { .. } => "invite_received",
            ServerMessage::PlayerInvited { .. } => "player_invited",
            ServerMessage::InviteDeclined { .. } => "invite_declined",
            ServerMessage::PlayerJoined { .. } => "player_joined",
            ServerMessage::SpectatorJoined { .. } => "spectator_joined",
            ServerMessage::PlayerLeft { .. } => "player_left",
            ServerMessage::SpectatorLeft { .. } => "spectator_left",
            ServerMessage::LobbyDisbanded { .. } => "lobby_disbanded",
            ServerMessage::ColorSet { .. } => "color_set",
            ServerMessage::PlayerReady { .. } => "player_ready",
            ServerMessage::MatchmakingWaiting => "matchmaking_waiting",
            ServerMessage::MatchFound { .. } => "match_found",
            ServerMessage::GameStarted { .. } => "game_started",
            ServerMessage::GameState { .. } => "game_state",
            ServerMessage::GameEnded { .. } => "game_ended",
            ServerMessage::PresenceChanged { .. } => "presence_changed",
            ServerMessage::CredentialExpired => "credential_expired",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_round_trips_through_tagged_json() {
        let json = r#"{"type":"GameInput","mv":"up"}"#;
        let msg: ClientMessage = serde_json::from_str(json).expect("parse");
        assert!(matches!(
            msg,
            ClientMessage::GameInput {
                mv: PaddleMove::Up
            }
        ));
    }

    #[test]
    fn server_message_carries_type_tag() {
        let msg = ServerMessage::Pong;
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"Pong\""));
    }

    #[test]
    fn unknown_client_message_is_a_parse_error() {
        let json = r#"{"type":"Teleport"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}
