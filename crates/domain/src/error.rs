//! Error taxonomy for lobby, matchmaking, and session operations.

use thiserror::Error;

/// Errors surfaced by lobby and matchmaking operations.
///
/// Everything except `Consistency` is a caller error: surfaced, non-fatal,
/// and correctable by the caller. `Consistency` indicates a prior bug; it is
/// fatal to the operation (never silently resolved) but not to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("lobby not found")]
    NotFound,

    #[error("already in this lobby")]
    AlreadyIn,

    #[error("spectator seats are full")]
    GameFull,

    #[error("already waiting in the matchmaking queue")]
    AlreadyInQueue,

    #[error("no pending invitation for this user")]
    InvalidInvitation,

    #[error("connection does not resolve to a live connection of this user")]
    NoConnection,

    #[error("user is not a player in this lobby")]
    NotInLobby,

    #[error("user has no live connection")]
    NotConnected,

    #[error("user is already in a game")]
    AlreadyInGame,

    #[error("connection is not online for this user")]
    NotOnline,

    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl LobbyError {
    /// Consistency violations indicate a prior bug and are logged at the
    /// highest severity by callers.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, LobbyError::Consistency(_))
    }
}
