//! Lobby entity and its pure state transitions.
//!
//! A lobby groups exactly two player seats and a bounded set of spectators
//! through the pre-game, in-game, and post-game phases. All methods here are
//! pure state transitions; connection bookkeeping, broadcasts, and
//! collaborator calls live in the engine crate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::user::UserRef;
use crate::error::LobbyError;
use crate::ids::{ConnectionId, LobbyId, UserId};

/// Lifecycle of a player seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Invited,
    Joined,
    Ready,
}

/// Which of the two player seats a user occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Player1,
    Player2,
}

impl PlayerRole {
    pub fn other(self) -> Self {
        match self {
            PlayerRole::Player1 => PlayerRole::Player2,
            PlayerRole::Player2 => PlayerRole::Player1,
        }
    }
}

/// One occupied player seat.
///
/// At most one connection is bound to a seat at a time; binding a new one
/// supersedes the old one for that seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSlot {
    pub user: UserRef,
    pub status: PlayerStatus,
    pub color: Option<String>,
    pub connection: Option<ConnectionId>,
}

impl PlayerSlot {
    fn joined(user: UserRef, connection: ConnectionId) -> Self {
        Self {
            user,
            status: PlayerStatus::Joined,
            color: None,
            connection: Some(connection),
        }
    }

    fn invited(user: UserRef) -> Self {
        Self {
            user,
            status: PlayerStatus::Invited,
            color: None,
            connection: None,
        }
    }
}

/// A spectator seat: one user watching through one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spectator {
    pub user: UserRef,
    pub connection: ConnectionId,
}

/// Pre/in/post-game session record.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub id: LobbyId,
    /// Created by the matchmaking queue; changes disband semantics.
    pub matchmaking: bool,
    pub game_started: bool,
    pub game_ended: bool,
    pub player1: PlayerSlot,
    pub player2: Option<PlayerSlot>,
    spectators: HashMap<UserId, Spectator>,
    max_spectators: usize,
    pub created_at: DateTime<Utc>,
}

impl Lobby {
    /// Create a lobby with `player1` seated and joined on `connection`.
    pub fn new(player1: UserRef, connection: ConnectionId, max_spectators: usize) -> Self {
        Self {
            id: LobbyId::new(),
            matchmaking: false,
            game_started: false,
            game_ended: false,
            player1: PlayerSlot::joined(player1, connection),
            player2: None,
            spectators: HashMap::new(),
            max_spectators,
            created_at: Utc::now(),
        }
    }

    /// Create a matchmaking lobby with both players already joined.
    pub fn new_matched(
        player1: UserRef,
        connection1: ConnectionId,
        player2: UserRef,
        connection2: ConnectionId,
        max_spectators: usize,
    ) -> Self {
        let mut lobby = Self::new(player1, connection1, max_spectators);
        lobby.matchmaking = true;
        lobby.player2 = Some(PlayerSlot::joined(player2, connection2));
        lobby
    }

    /// Which seat `user` occupies, if any.
    pub fn role_of(&self, user: UserId) -> Option<PlayerRole> {
        if self.player1.user.id == user {
            Some(PlayerRole::Player1)
        } else if self.player2.as_ref().is_some_and(|p| p.user.id == user) {
            Some(PlayerRole::Player2)
        } else {
            None
        }
    }

    pub fn player(&self, role: PlayerRole) -> Option<&PlayerSlot> {
        match role {
            PlayerRole::Player1 => Some(&self.player1),
            PlayerRole::Player2 => self.player2.as_ref(),
        }
    }

    pub fn player_mut(&mut self, role: PlayerRole) -> Option<&mut PlayerSlot> {
        match role {
            PlayerRole::Player1 => Some(&mut self.player1),
            PlayerRole::Player2 => self.player2.as_mut(),
        }
    }

    pub fn is_spectator(&self, user: UserId) -> bool {
        self.spectators.contains_key(&user)
    }

    /// Whether `user` occupies a player or spectator seat.
    pub fn is_member(&self, user: UserId) -> bool {
        self.role_of(user).is_some() || self.is_spectator(user)
    }

    /// Seat `user` as the invited second player. The seat stays
    /// connectionless until they join.
    pub fn invite(&mut self, user: UserRef) -> Result<(), LobbyError> {
        if self.player1.user.id == user.id {
            return Err(LobbyError::AlreadyIn);
        }
        if self.player2.is_some() {
            return Err(LobbyError::InvalidInvitation);
        }
        self.player2 = Some(PlayerSlot::invited(user));
        Ok(())
    }

    /// Bind the invited second player's connection and mark them joined.
    pub fn accept_player2(&mut self, connection: ConnectionId) -> Result<(), LobbyError> {
        let slot = self.player2.as_mut().ok_or(LobbyError::InvalidInvitation)?;
        if slot.status > PlayerStatus::Invited && slot.connection.is_some() {
            return Err(LobbyError::AlreadyIn);
        }
        slot.status = PlayerStatus::Joined;
        slot.connection = Some(connection);
        Ok(())
    }

    /// Remove the second player's seat entirely (decline, partial leave).
    pub fn clear_player2(&mut self) -> Option<PlayerSlot> {
        self.player2.take()
    }

    pub fn add_spectator(
        &mut self,
        user: UserRef,
        connection: ConnectionId,
    ) -> Result<(), LobbyError> {
        if self.spectators.contains_key(&user.id) {
            return Err(LobbyError::AlreadyIn);
        }
        if self.spectators.len() >= self.max_spectators {
            return Err(LobbyError::GameFull);
        }
        self.spectators.insert(user.id, Spectator { user, connection });
        Ok(())
    }

    pub fn remove_spectator(&mut self, user: UserId) -> Option<Spectator> {
        self.spectators.remove(&user)
    }

    pub fn spectators(&self) -> impl Iterator<Item = &Spectator> {
        self.spectators.values()
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Set the display color for whichever seat `user` occupies.
    pub fn set_color(&mut self, user: UserId, color: String) -> Result<(), LobbyError> {
        let role = self.role_of(user).ok_or(LobbyError::NotInLobby)?;
        if let Some(slot) = self.player_mut(role) {
            slot.color = Some(color);
        }
        Ok(())
    }

    /// Mark `user`'s seat ready. Returns true when both seats are now ready.
    pub fn set_ready(&mut self, user: UserId) -> Result<bool, LobbyError> {
        let role = self.role_of(user).ok_or(LobbyError::NotInLobby)?;
        if let Some(slot) = self.player_mut(role) {
            slot.status = PlayerStatus::Ready;
        }
        Ok(self.both_ready())
    }

    pub fn both_ready(&self) -> bool {
        self.player1.status == PlayerStatus::Ready
            && self
                .player2
                .as_ref()
                .is_some_and(|p| p.status == PlayerStatus::Ready)
    }

    /// Transition into the in-game phase. Both seats must be ready.
    pub fn begin_game(&mut self) -> Result<(), LobbyError> {
        if !self.both_ready() {
            return Err(LobbyError::Consistency(format!(
                "lobby {} started without both players ready",
                self.id
            )));
        }
        self.game_started = true;
        Ok(())
    }

    pub fn finish_game(&mut self) {
        self.game_ended = true;
    }

    /// Connections of both seated players, in seat order.
    pub fn player_connections(&self) -> Vec<ConnectionId> {
        let mut out = Vec::with_capacity(2);
        if let Some(c) = self.player1.connection {
            out.push(c);
        }
        if let Some(c) = self.player2.as_ref().and_then(|p| p.connection) {
            out.push(c);
        }
        out
    }

    pub fn spectator_connections(&self) -> Vec<ConnectionId> {
        self.spectators.values().map(|s| s.connection).collect()
    }

    /// Every connection currently bound to this lobby.
    pub fn member_connections(&self) -> Vec<ConnectionId> {
        let mut out = self.player_connections();
        out.extend(self.spectator_connections());
        out
    }

    /// Every user currently seated in this lobby.
    pub fn member_users(&self) -> Vec<UserRef> {
        let mut out = vec![self.player1.user.clone()];
        if let Some(p2) = &self.player2 {
            out.push(p2.user.clone());
        }
        out.extend(self.spectators.values().map(|s| s.user.clone()));
        out
    }
}
