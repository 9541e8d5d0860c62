mod lobby;
mod user;

pub use lobby::{Lobby, PlayerRole, PlayerSlot, PlayerStatus, Spectator};
pub use user::{Presence, UserRef};
