//! WebSocket handler for client connections.
//!
//! The socket is authenticated before the upgrade; after it, the connection
//! lives in the registry until the peer goes away. Commands travel over
//! HTTP; the socket only carries heartbeats and in-game input downstream,
//! and every event fan-out upstream.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use rallyd_domain::ConnectionId;
use rallyd_shared::{ClientMessage, ServerMessage};

use crate::api::connections::ConnectionInfo;
use crate::ports::AuthedUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// WebSocket upgrade handler. The handshake token is resolved through the
/// auth collaborator before the upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.auth.authenticate(&query.token).await {
        Ok(authed) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, authed))
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake rejected");
            (StatusCode::UNAUTHORIZED, "invalid token").into_response()
        }
    }
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, authed: AuthedUser) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = ConnectionId::new();
    let user = authed.user.clone();

    // Channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user.id,
        "New WebSocket connection established"
    );

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    state
        .registry
        .register(
            ConnectionInfo::new(connection_id, user.clone(), authed.expires_at),
            tx.clone(),
        )
        .await;
    state.lobbies.announce_presence(user.id).await;

    // Handle incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text(&state, connection_id, &tx, &text).await;
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "WebSocket closed by client");
                break;
            }
            Ok(Message::Ping(_)) => {
                let _ = tx.send(ServerMessage::Pong);
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Cleanup order matters: registry entry first, then the matchmaking
    // queue, then any affiliated lobby (a started game becomes a forfeit),
    // and finally the presence recompute reflects the post-cleanup truth.
    let info = state.registry.unregister(connection_id).await;
    state.queue.remove(user.id).await;
    if let Some(affiliation) = info.and_then(|i| i.affiliation) {
        state
            .lobbies
            .disconnected(user.id, affiliation.lobby_id)
            .await;
    }
    state.lobbies.announce_presence(user.id).await;

    send_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection terminated");
}

async fn handle_text(
    state: &AppState,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Heartbeat) => {
            let _ = tx.send(ServerMessage::Pong);
        }
        Ok(ClientMessage::GameInput { mv }) => {
            // Input only counts from a player connection of a running game;
            // anything else is dropped.
            let Some(info) = state.registry.get(connection_id).await else {
                return;
            };
            let Some(affiliation) = info.affiliation else {
                return;
            };
            if affiliation.spectator {
                return;
            }
            state
                .games
                .apply_input(affiliation.lobby_id, connection_id, mv)
                .await;
        }
        Err(e) => {
            if is_game_input_frame(text) {
                // Malformed game input is dropped, never surfaced.
                tracing::debug!(connection_id = %connection_id, "Dropped malformed game input");
            } else {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse message");
                let _ = tx.send(ServerMessage::Error {
                    code: "PARSE_ERROR".to_string(),
                    message: format!("Invalid message format: {}", e),
                });
            }
        }
    }
}

fn is_game_input_frame(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .is_some_and(|t| t == "GameInput")
}
