//! HTTP command surface.
//!
//! Every lobby operation is keyed by lobby uuid; matchmaking is keyed by
//! the caller's identity alone. Commands mutate state through the managers
//! and fan events out over the WebSocket layer; the HTTP response itself
//! only confirms (or rejects) the command.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use rallyd_domain::{ConnectionId, LobbyError, LobbyId, Presence, UserId};
use rallyd_shared::LobbyDto;

use crate::api::websocket::ws_handler;
use crate::ports::AuthedUser;
use crate::state::AppState;

type ApiError = (StatusCode, String);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/lobbies", post(create_lobby))
        .route("/lobbies/{id}", get(get_lobby))
        .route("/lobbies/{id}/join", post(join_lobby))
        .route("/lobbies/{id}/decline", post(decline_invite))
        .route("/lobbies/{id}/color", post(set_color))
        .route("/lobbies/{id}/ready", post(ready))
        .route("/lobbies/{id}/leave", post(leave_lobby))
        .route("/lobbies/{id}/kick", post(kick_member))
        .route("/invites", post(invite))
        .route("/matchmaking", post(join_queue).delete(leave_queue))
        .route("/users/{id}/presence", get(user_presence))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "missing bearer token".to_string(),
        ))?;
    state
        .auth
        .authenticate(token)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))
}

fn lobby_error(e: LobbyError) -> ApiError {
    let status = match &e {
        LobbyError::NotFound => StatusCode::NOT_FOUND,
        LobbyError::NotInLobby => StatusCode::FORBIDDEN,
        LobbyError::AlreadyIn
        | LobbyError::GameFull
        | LobbyError::AlreadyInQueue
        | LobbyError::InvalidInvitation
        | LobbyError::AlreadyInGame => StatusCode::CONFLICT,
        LobbyError::NoConnection | LobbyError::NotConnected | LobbyError::NotOnline => {
            StatusCode::BAD_REQUEST
        }
        LobbyError::Consistency(_) => {
            tracing::error!(error = %e, "Consistency violation surfaced to the HTTP layer");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

#[derive(Debug, Deserialize)]
struct CreateLobbyRequest {
    connection_id: ConnectionId,
    opponent_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct ConnectionRequest {
    connection_id: ConnectionId,
}

#[derive(Debug, Deserialize)]
struct InviteRequest {
    connection_id: ConnectionId,
    target_id: UserId,
}

#[derive(Debug, Deserialize)]
struct ColorRequest {
    color: String,
}

#[derive(Debug, Deserialize)]
struct KickRequest {
    user_id: UserId,
}

async fn create_lobby(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateLobbyRequest>,
) -> Result<(StatusCode, Json<LobbyDto>), ApiError> {
    let authed = authenticate(&state, &headers).await?;
    let lobby = state
        .lobbies
        .create(authed.user, body.connection_id, body.opponent_id)
        .await
        .map_err(lobby_error)?;
    Ok((StatusCode::CREATED, Json(lobby)))
}

async fn get_lobby(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Json<LobbyDto>, ApiError> {
    authenticate(&state, &headers).await?;
    let lobby = state.lobbies.snapshot(lobby_id).await.map_err(lobby_error)?;
    Ok(Json(lobby))
}

async fn join_lobby(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
    Json(body): Json<ConnectionRequest>,
) -> Result<Json<LobbyDto>, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    let lobby = state
        .lobbies
        .join(authed.user, body.connection_id, lobby_id)
        .await
        .map_err(lobby_error)?;
    Ok(Json(lobby))
}

async fn invite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<InviteRequest>,
) -> Result<Json<LobbyDto>, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    let lobby = state
        .lobbies
        .invite(authed.user, body.connection_id, body.target_id)
        .await
        .map_err(lobby_error)?;
    Ok(Json(lobby))
}

async fn decline_invite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .lobbies
        .decline(authed.user.id, lobby_id)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_color(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
    Json(body): Json<ColorRequest>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .lobbies
        .color(authed.user.id, lobby_id, body.color)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ready(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .lobbies
        .ready(authed.user.id, lobby_id)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_lobby(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .lobbies
        .leave(authed.user.id, lobby_id)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn kick_member(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lobby_id): Path<LobbyId>,
    Json(body): Json<KickRequest>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .lobbies
        .kick(authed.user.id, lobby_id, body.user_id)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConnectionRequest>,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state
        .queue
        .add(authed.user, body.connection_id)
        .await
        .map_err(lobby_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn leave_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let authed = authenticate(&state, &headers).await?;
    state.queue.remove(authed.user.id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn user_presence(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> Result<Json<Presence>, ApiError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.registry.presence_of(user_id).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_matches_the_taxonomy() {
        assert_eq!(lobby_error(LobbyError::NotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(lobby_error(LobbyError::NotInLobby).0, StatusCode::FORBIDDEN);
        assert_eq!(lobby_error(LobbyError::AlreadyIn).0, StatusCode::CONFLICT);
        assert_eq!(lobby_error(LobbyError::GameFull).0, StatusCode::CONFLICT);
        assert_eq!(
            lobby_error(LobbyError::NoConnection).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            lobby_error(LobbyError::Consistency("bug".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
