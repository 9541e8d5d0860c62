//! Rallyd wire protocol: the message unions and DTOs exchanged between the
//! engine and its clients.

pub mod dto;
pub mod messages;

pub use dto::{GameFrame, LobbyDto, PaddleMove, PlayerSeatDto, Winner};
pub use messages::{ClientMessage, ServerMessage};
