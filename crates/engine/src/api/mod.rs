//! Transport-facing layer: connection tracking, the WebSocket handler, and
//! the HTTP command routes.

pub mod connections;
pub mod routes;
pub mod websocket;

pub use connections::{ConnectionInfo, ConnectionRegistry, LobbyAffiliation};
