//! Ports to external collaborators.
//!
//! The orchestrator consumes these through narrow interfaces only:
//! credential resolution, the user directory, match history, invite
//! notifications, and the physics engine. In-memory reference adapters live
//! in [`memory`]; the paddle-ball engine adapter lives in `game::pong`.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rallyd_domain::{LobbyId, PlayerRole, Presence, UserId, UserRef};
use rallyd_shared::{GameFrame, LobbyDto, PaddleMove, Winner};

/// Outcome of a successful credential resolution.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user: UserRef,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
}

/// Resolves a request or connection handshake to an authenticated user.
///
/// The orchestrator never validates credentials itself beyond checking the
/// cached expiry at send time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthPort: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthedUser, AuthError>;
}

/// The external user directory: profile lookup plus the presence sink this
/// subsystem pushes to after status transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectoryPort: Send + Sync {
    async fn find_by_id(&self, user_id: UserId) -> Option<UserRef>;
    async fn set_presence(&self, user_id: UserId, presence: Presence) -> anyhow::Result<()>;
}

/// Snapshot handed to the history collaborator when a game finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub lobby: LobbyDto,
    pub winner: Winner,
    pub score1: u32,
    pub score2: u32,
    pub finished_at: DateTime<Utc>,
}

/// Persists finished matches. Failures are logged, never rolled back into
/// lobby state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryPort: Send + Sync {
    async fn record(&self, record: MatchRecord) -> anyhow::Result<()>;
}

/// Invite notification fan-out and lifecycle cleanup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify_invite(
        &self,
        from: &UserRef,
        to: UserId,
        lobby_id: LobbyId,
    ) -> anyhow::Result<()>;
    async fn mark_invites_read(&self, from: UserId, to: UserId) -> anyhow::Result<()>;
}

/// One running physics instance. Opaque to the orchestrator: it is only
/// advanced, fed input, and read for scores. Driven exclusively from the
/// session's tick task, so implementations need no internal locking.
#[cfg_attr(test, mockall::automock)]
pub trait GameEngine: Send {
    /// Advance the simulation by `dt` seconds and produce the next frame.
    fn advance(&mut self, dt: f64) -> GameFrame;
    /// Apply a parsed move for one side. Malformed payloads never reach
    /// this point.
    fn apply_input(&mut self, side: PlayerRole, mv: PaddleMove);
    fn score_of(&self, side: PlayerRole) -> u32;
}

/// Creates one engine instance per game session.
#[cfg_attr(test, mockall::automock)]
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn GameEngine>;
}
