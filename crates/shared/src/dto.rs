//! Wire DTOs carried inside the message unions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rallyd_domain::{Lobby, LobbyId, PlayerSlot, PlayerStatus, UserRef};

/// Paddle movement input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddleMove {
    Up,
    Down,
    Stop,
}

/// Final result of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Player1,
    Player2,
    Tie,
}

/// One authoritative engine snapshot, produced per tick.
///
/// Coordinates are normalized to a unit field; clients scale to their
/// viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameFrame {
    pub ball_x: f64,
    pub ball_y: f64,
    pub paddle1_y: f64,
    pub paddle2_y: f64,
    pub score1: u32,
    pub score2: u32,
}

/// One player seat as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSeatDto {
    pub user: UserRef,
    pub status: PlayerStatus,
    pub color: Option<String>,
}

impl From<&PlayerSlot> for PlayerSeatDto {
    fn from(slot: &PlayerSlot) -> Self {
        Self {
            user: slot.user.clone(),
            status: slot.status,
            color: slot.color.clone(),
        }
    }
}

/// Lobby snapshot as seen on the wire. Connection ids never leave the
/// engine; seats carry only user-facing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyDto {
    pub id: LobbyId,
    pub matchmaking: bool,
    pub game_started: bool,
    pub game_ended: bool,
    pub player1: PlayerSeatDto,
    pub player2: Option<PlayerSeatDto>,
    pub spectators: Vec<UserRef>,
    pub created_at: DateTime<Utc>,
}

impl From<&Lobby> for LobbyDto {
    fn from(lobby: &Lobby) -> Self {
        Self {
            id: lobby.id,
            matchmaking: lobby.matchmaking,
            game_started: lobby.game_started,
            game_ended: lobby.game_ended,
            player1: PlayerSeatDto::from(&lobby.player1),
            player2: lobby.player2.as_ref().map(PlayerSeatDto::from),
            spectators: lobby.spectators().map(|s| s.user.clone()).collect(),
            created_at: lobby.created_at,
        }
    }
}
