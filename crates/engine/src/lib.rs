//! Rallyd engine: the real-time match orchestration server.
//!
//! Turns a pair of authenticated users into a running match: lobby
//! lifecycle, matchmaking, per-connection tracking, selective event
//! fan-out, and the per-tick game loop over the physics port.

pub mod api;
pub mod dispatch;
pub mod game;
pub mod matchmaking;
pub mod ports;
pub mod session;
pub mod state;

#[cfg(test)]
mod test_support;
