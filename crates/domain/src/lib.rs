//! Rallyd domain: ids, entities, and invariants shared by every crate.
//!
//! This crate is pure state: no async, no I/O, no framework types.

pub mod entities;
pub mod error;
pub mod ids;

pub use entities::{Lobby, PlayerRole, PlayerSlot, PlayerStatus, Presence, Spectator, UserRef};
pub use error::LobbyError;
pub use ids::{ConnectionId, LobbyId, UserId};
