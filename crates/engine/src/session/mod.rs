//! Lobby lifecycle management.
//!
//! The manager owns the lobbies-by-id map and runs every public operation
//! under its write lock, so each check-then-act sequence (resolve role,
//! mutate seats, broadcast) is atomic with respect to every other command,
//! timer callback, and disconnect. Broadcasts and collaborator pushes
//! happen from a consistent snapshot taken inside the same critical
//! section.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use rallyd_domain::{
    ConnectionId, Lobby, LobbyError, LobbyId, PlayerRole, PlayerStatus, UserId, UserRef,
};
use rallyd_shared::{LobbyDto, ServerMessage};

use crate::api::connections::{ConnectionRegistry, LobbyAffiliation};
use crate::dispatch::{DispatchTarget, Dispatcher};
use crate::game::{GameOver, GameSessionManager};
use crate::ports::{NotificationPort, UserDirectoryPort};

/// How a member's departure affects the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// Spectator seats never disband and never touch player slots.
    Spectator,
    /// Second player backs out of a still-forming, non-matchmaking lobby.
    PartialPlayer2,
    /// Owner left, the game already started, or the lobby came from
    /// matchmaking: the whole lobby goes.
    Disband,
}

pub struct LobbyManager {
    lobbies: RwLock<HashMap<LobbyId, Lobby>>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    games: Arc<GameSessionManager>,
    directory: Arc<dyn UserDirectoryPort>,
    notifications: Arc<dyn NotificationPort>,
    max_spectators: usize,
}

impl LobbyManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        games: Arc<GameSessionManager>,
        directory: Arc<dyn UserDirectoryPort>,
        notifications: Arc<dyn NotificationPort>,
        max_spectators: usize,
    ) -> Self {
        Self {
            lobbies: RwLock::new(HashMap::new()),
            registry,
            dispatcher,
            games,
            directory,
            notifications,
            max_spectators,
        }
    }

    /// Create a lobby owned by `actor`, optionally inviting an opponent.
    ///
    /// Removes `actor` from any lobby they currently play in first (at most
    /// one; more is a consistency violation). The owner's directory status
    /// is not pushed to in-game until play actually starts.
    pub async fn create(
        &self,
        actor: UserRef,
        connection: ConnectionId,
        opponent: Option<UserId>,
    ) -> Result<LobbyDto, LobbyError> {
        self.registry
            .user_connection(actor.id, connection)
            .await
            .ok_or(LobbyError::NoConnection)?;

        let opponent = match opponent {
            Some(id) if id == actor.id => return Err(LobbyError::InvalidInvitation),
            Some(id) => Some(
                self.directory
                    .find_by_id(id)
                    .await
                    .ok_or(LobbyError::NotFound)?,
            ),
            None => None,
        };

        let mut lobbies = self.lobbies.write().await;
        if let Some(current) = find_player_lobby(&lobbies, actor.id)? {
            self.remove_member_locked(&mut lobbies, current, actor.id)
                .await?;
        }

        let mut lobby = Lobby::new(actor.clone(), connection, self.max_spectators);
        if let Some(opponent) = &opponent {
            lobby.invite(opponent.clone())?;
        }
        let lobby_id = lobby.id;
        let dto = LobbyDto::from(&lobby);
        lobbies.insert(lobby_id, lobby);
        self.registry
            .set_affiliation(
                connection,
                Some(LobbyAffiliation {
                    lobby_id,
                    spectator: false,
                }),
            )
            .await;
        tracing::info!(lobby_id = %lobby_id, user_id = %actor.id, "Lobby created");

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(vec![connection]),
                &ServerMessage::LobbyCreated { lobby: dto.clone() },
            )
            .await;
        if let Some(opponent) = opponent {
            self.send_invite(&actor, &opponent, lobby_id).await;
        }
        Ok(dto)
    }

    /// Matchmaking-only path: both players start joined, no invite step.
    ///
    /// Announces the pairing to exactly the two submitted connections, plus
    /// the regular join broadcasts for clients listening on the generic
    /// channel.
    pub async fn create_match(
        &self,
        player1: (UserRef, ConnectionId),
        player2: (UserRef, ConnectionId),
    ) -> Result<LobbyDto, LobbyError> {
        let (user1, connection1) = player1;
        let (user2, connection2) = player2;

        let mut lobbies = self.lobbies.write().await;
        for user in [&user1, &user2] {
            if find_player_lobby(&lobbies, user.id)?.is_some() {
                return Err(LobbyError::AlreadyInGame);
            }
        }

        let lobby = Lobby::new_matched(
            user1.clone(),
            connection1,
            user2.clone(),
            connection2,
            self.max_spectators,
        );
        let lobby_id = lobby.id;
        let dto = LobbyDto::from(&lobby);
        lobbies.insert(lobby_id, lobby);
        for connection in [connection1, connection2] {
            self.registry
                .set_affiliation(
                    connection,
                    Some(LobbyAffiliation {
                        lobby_id,
                        spectator: false,
                    }),
                )
                .await;
        }
        tracing::info!(
            lobby_id = %lobby_id,
            player1 = %user1.id,
            player2 = %user2.id,
            "Matchmaking lobby created"
        );

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(vec![connection1, connection2]),
                &ServerMessage::MatchFound { lobby: dto.clone() },
            )
            .await;
        for user in [&user1, &user2] {
            self.dispatcher
                .dispatch(
                    DispatchTarget::Connections(vec![connection1, connection2]),
                    &ServerMessage::PlayerJoined {
                        lobby_id,
                        user: user.clone(),
                    },
                )
                .await;
        }
        for user in [user1.id, user2.id] {
            self.announce_presence(user).await;
        }
        Ok(dto)
    }

    /// Invite `target` into the actor's active lobby, creating one when the
    /// actor has none. More than one active lobby is a consistency
    /// violation.
    pub async fn invite(
        &self,
        actor: UserRef,
        connection: ConnectionId,
        target: UserId,
    ) -> Result<LobbyDto, LobbyError> {
        self.registry
            .user_connection(actor.id, connection)
            .await
            .ok_or(LobbyError::NoConnection)?;
        if target == actor.id {
            return Err(LobbyError::InvalidInvitation);
        }
        let target_user = self
            .directory
            .find_by_id(target)
            .await
            .ok_or(LobbyError::NotFound)?;

        {
            let mut lobbies = self.lobbies.write().await;
            if let Some(lobby_id) = find_player_lobby(&lobbies, actor.id)? {
                let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
                // Also recovers a user currently seated as a spectator: the
                // spectator seat stays until they join as the player.
                lobby.invite(target_user.clone())?;
                let dto = LobbyDto::from(&*lobby);
                let members = lobby.member_connections();

                self.dispatcher
                    .dispatch(
                        DispatchTarget::LobbyMembers {
                            members,
                            exclude: vec![connection],
                        },
                        &ServerMessage::PlayerInvited {
                            lobby_id,
                            user: target_user.clone(),
                        },
                    )
                    .await;
                self.send_invite(&actor, &target_user, lobby_id).await;
                return Ok(dto);
            }
        }
        self.create(actor, connection, Some(target)).await
    }

    /// Join a lobby: as the invited second player (identity-resolved) or as
    /// a spectator, in any state including in-game.
    pub async fn join(
        &self,
        actor: UserRef,
        connection: ConnectionId,
        lobby_id: LobbyId,
    ) -> Result<LobbyDto, LobbyError> {
        self.registry
            .user_connection(actor.id, connection)
            .await
            .ok_or(LobbyError::NoConnection)?;

        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;

        match lobby.role_of(actor.id) {
            Some(PlayerRole::Player1) => Err(LobbyError::AlreadyIn),
            Some(PlayerRole::Player2) => {
                // Re-seat a spectator into the player slot before binding.
                if let Some(spectator) = lobby.remove_spectator(actor.id) {
                    if spectator.connection != connection {
                        self.registry
                            .set_affiliation(spectator.connection, None)
                            .await;
                    }
                    self.dispatcher
                        .dispatch(
                            DispatchTarget::Connections(lobby.member_connections()),
                            &ServerMessage::SpectatorLeft {
                                lobby_id,
                                user: spectator.user,
                            },
                        )
                        .await;
                }
                lobby.accept_player2(connection)?;
                self.registry
                    .set_affiliation(
                        connection,
                        Some(LobbyAffiliation {
                            lobby_id,
                            spectator: false,
                        }),
                    )
                    .await;
                let dto = LobbyDto::from(&*lobby);
                let members = lobby.member_connections();
                tracing::info!(lobby_id = %lobby_id, user_id = %actor.id, "Player joined");

                self.dispatcher
                    .dispatch(
                        DispatchTarget::LobbyMembers {
                            members,
                            exclude: vec![connection],
                        },
                        &ServerMessage::PlayerJoined {
                            lobby_id,
                            user: actor.clone(),
                        },
                    )
                    .await;
                self.announce_presence(actor.id).await;
                Ok(dto)
            }
            None => {
                lobby.add_spectator(actor.clone(), connection)?;
                self.registry
                    .set_affiliation(
                        connection,
                        Some(LobbyAffiliation {
                            lobby_id,
                            spectator: true,
                        }),
                    )
                    .await;
                let dto = LobbyDto::from(&*lobby);
                let members = lobby.member_connections();
                let spectator_connections = lobby.spectator_connections();
                tracing::info!(
                    lobby_id = %lobby_id,
                    user_id = %actor.id,
                    spectators = lobby.spectator_count(),
                    "Spectator joined"
                );

                if self.games.is_running(lobby_id).await {
                    self.games
                        .update_spectators(lobby_id, spectator_connections)
                        .await;
                }
                self.dispatcher
                    .dispatch(
                        DispatchTarget::LobbyMembers {
                            members,
                            exclude: vec![connection],
                        },
                        &ServerMessage::SpectatorJoined {
                            lobby_id,
                            user: actor.clone(),
                        },
                    )
                    .await;
                self.announce_presence(actor.id).await;
                Ok(dto)
            }
        }
    }

    /// Set the display color for whichever player seat `actor` occupies.
    pub async fn color(
        &self,
        actor: UserId,
        lobby_id: LobbyId,
        color: String,
    ) -> Result<(), LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        lobby.set_color(actor, color.clone())?;

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(lobby.member_connections()),
                &ServerMessage::ColorSet {
                    lobby_id,
                    user_id: actor,
                    color,
                },
            )
            .await;
        Ok(())
    }

    /// Flag `actor` ready; the second Ready starts the game session.
    pub async fn ready(&self, actor: UserId, lobby_id: LobbyId) -> Result<(), LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        let both_ready = lobby.set_ready(actor)?;

        if !both_ready {
            self.dispatcher
                .dispatch(
                    DispatchTarget::Connections(lobby.member_connections()),
                    &ServerMessage::PlayerReady {
                        lobby_id,
                        user_id: actor,
                    },
                )
                .await;
            return Ok(());
        }

        lobby.begin_game()?;
        if let Err(e) = self.games.start(lobby).await {
            // The lobby stays formed and ready; only the started flag rolls
            // back, since no session exists to back it.
            lobby.game_started = false;
            tracing::error!(lobby_id = %lobby_id, error = %e, "Failed to start game session");
            return Err(e);
        }
        let members = lobby.member_connections();
        let players: Vec<UserId> = [
            Some(lobby.player1.user.id),
            lobby.player2.as_ref().map(|p| p.user.id),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(members),
                &ServerMessage::GameStarted { lobby_id },
            )
            .await;
        for player in players {
            self.announce_presence(player).await;
        }
        Ok(())
    }

    /// Leave a lobby. Owners, started games, and matchmaking lobbies
    /// disband; a forming second player or a spectator leaves partially.
    pub async fn leave(&self, actor: UserId, lobby_id: LobbyId) -> Result<(), LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        self.remove_member_locked(&mut lobbies, lobby_id, actor).await
    }

    /// Owner-only forced leave of a named participant, following the same
    /// partial/full rules as `leave`.
    pub async fn kick(
        &self,
        actor: UserId,
        lobby_id: LobbyId,
        target: UserId,
    ) -> Result<(), LobbyError> {
        if actor == target {
            return Err(LobbyError::NotInLobby);
        }
        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies.get(&lobby_id).ok_or(LobbyError::NotFound)?;
        if lobby.role_of(actor) != Some(PlayerRole::Player1) {
            return Err(LobbyError::NotInLobby);
        }
        if !lobby.is_member(target) {
            return Err(LobbyError::NotInLobby);
        }
        tracing::info!(lobby_id = %lobby_id, target = %target, "Participant kicked");
        self.remove_member_locked(&mut lobbies, lobby_id, target).await
    }

    /// The invited second player declines; the lobby survives for its
    /// owner.
    pub async fn decline(&self, actor: UserId, lobby_id: LobbyId) -> Result<(), LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        let invited = lobby
            .player2
            .as_ref()
            .is_some_and(|p| p.user.id == actor && p.status == PlayerStatus::Invited);
        if !invited {
            return Err(LobbyError::InvalidInvitation);
        }
        let Some(slot) = lobby.clear_player2() else {
            return Err(LobbyError::InvalidInvitation);
        };
        let owner = lobby.player1.user.id;
        let members = lobby.member_connections();
        tracing::info!(lobby_id = %lobby_id, user_id = %actor, "Invitation declined");

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(members),
                &ServerMessage::InviteDeclined {
                    lobby_id,
                    user: slot.user,
                },
            )
            .await;
        if let Err(e) = self.notifications.mark_invites_read(owner, actor).await {
            tracing::warn!(lobby_id = %lobby_id, error = %e, "Failed to mark invite read");
        }
        Ok(())
    }

    /// Tear the lobby down after its game session reported the win
    /// threshold. No-op when a disconnect already disbanded it.
    pub async fn finalize_game(&self, lobby_id: LobbyId) {
        let mut lobbies = self.lobbies.write().await;
        if !lobbies.contains_key(&lobby_id) {
            tracing::debug!(lobby_id = %lobby_id, "Game over for an already-removed lobby");
            return;
        }
        if let Err(e) = self.disband_locked(&mut lobbies, lobby_id, None).await {
            tracing::error!(lobby_id = %lobby_id, error = %e, "Failed to finalize game");
        }
    }

    /// Forced leave on disconnect. Tolerates a lobby that is already gone.
    pub async fn disconnected(&self, user: UserId, lobby_id: LobbyId) {
        match self.leave(user, lobby_id).await {
            Ok(()) | Err(LobbyError::NotFound) | Err(LobbyError::NotInLobby) => {}
            Err(e) => {
                tracing::error!(
                    lobby_id = %lobby_id,
                    user_id = %user,
                    error = %e,
                    "Disconnect cleanup failed"
                );
            }
        }
    }

    /// Read-only lobby snapshot.
    pub async fn snapshot(&self, lobby_id: LobbyId) -> Result<LobbyDto, LobbyError> {
        let lobbies = self.lobbies.read().await;
        lobbies
            .get(&lobby_id)
            .map(LobbyDto::from)
            .ok_or(LobbyError::NotFound)
    }

    pub async fn lobby_count(&self) -> usize {
        let lobbies = self.lobbies.read().await;
        lobbies.len()
    }

    async fn send_invite(&self, from: &UserRef, to: &UserRef, lobby_id: LobbyId) {
        if let Err(e) = self.notifications.notify_invite(from, to.id, lobby_id).await {
            tracing::warn!(lobby_id = %lobby_id, error = %e, "Failed to deliver invite notification");
        }
        self.dispatcher
            .dispatch(
                DispatchTarget::User(to.id),
                &ServerMessage::InviteReceived {
                    lobby_id,
                    from: from.clone(),
                },
            )
            .await;
    }

    async fn remove_member_locked(
        &self,
        lobbies: &mut HashMap<LobbyId, Lobby>,
        lobby_id: LobbyId,
        actor: UserId,
    ) -> Result<(), LobbyError> {
        let lobby = lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        match classify_removal(lobby, actor)? {
            Removal::Spectator => {
                let targets = lobby.member_connections();
                let Some(spectator) = lobby.remove_spectator(actor) else {
                    return Ok(());
                };
                self.registry.set_affiliation(spectator.connection, None).await;
                if self.games.is_running(lobby_id).await {
                    self.games
                        .update_spectators(lobby_id, lobby.spectator_connections())
                        .await;
                }
                self.dispatcher
                    .dispatch(
                        DispatchTarget::Connections(targets),
                        &ServerMessage::SpectatorLeft {
                            lobby_id,
                            user: spectator.user,
                        },
                    )
                    .await;
                self.announce_presence(actor).await;
                Ok(())
            }
            Removal::PartialPlayer2 => {
                let targets = lobby.member_connections();
                let Some(slot) = lobby.clear_player2() else {
                    return Ok(());
                };
                if let Some(connection) = slot.connection {
                    self.registry.set_affiliation(connection, None).await;
                }
                self.dispatcher
                    .dispatch(
                        DispatchTarget::Connections(targets),
                        &ServerMessage::PlayerLeft {
                            lobby_id,
                            user: slot.user,
                        },
                    )
                    .await;
                self.announce_presence(actor).await;
                Ok(())
            }
            Removal::Disband => self.disband_locked(lobbies, lobby_id, Some(actor)).await,
        }
    }

    /// Full disband: end any running session (attributing a forfeit win to
    /// the remaining player), broadcast the end and the disband, clear every
    /// member's affiliation, restore presence, and delete the lobby.
    async fn disband_locked(
        &self,
        lobbies: &mut HashMap<LobbyId, Lobby>,
        lobby_id: LobbyId,
        leaving: Option<UserId>,
    ) -> Result<(), LobbyError> {
        let mut lobby = lobbies.remove(&lobby_id).ok_or(LobbyError::NotFound)?;
        let connections = lobby.member_connections();
        let users: Vec<UserId> = lobby.member_users().into_iter().map(|u| u.id).collect();

        if lobby.game_started {
            lobby.finish_game();
        }
        if let Some(outcome) = self.games.end(&lobby, leaving).await {
            self.dispatcher
                .dispatch(
                    DispatchTarget::Connections(connections.clone()),
                    &ServerMessage::GameEnded {
                        lobby_id,
                        winner: outcome.winner,
                        score1: outcome.score1,
                        score2: outcome.score2,
                    },
                )
                .await;
        }
        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(connections.clone()),
                &ServerMessage::LobbyDisbanded { lobby_id },
            )
            .await;
        self.registry.clear_affiliations(&connections).await;
        for user in users {
            self.announce_presence(user).await;
        }
        tracing::info!(lobby_id = %lobby_id, "Lobby disbanded");
        Ok(())
    }

    /// Push the user's registry-derived presence to the directory sink and
    /// fan the change out.
    pub async fn announce_presence(&self, user_id: UserId) {
        let presence = self.registry.presence_of(user_id).await;
        tracing::debug!(user_id = %user_id, presence = %presence, "Presence updated");
        if let Err(e) = self.directory.set_presence(user_id, presence).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to push presence");
        }
        self.dispatcher
            .dispatch(
                DispatchTarget::All,
                &ServerMessage::PresenceChanged { user_id, presence },
            )
            .await;
    }
}

/// Spawn the worker that turns game-over signals into lobby teardown.
pub fn spawn_game_over_worker(
    lobbies: Arc<LobbyManager>,
    mut game_over_rx: mpsc::UnboundedReceiver<GameOver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(over) = game_over_rx.recv().await {
            lobbies.finalize_game(over.lobby_id).await;
        }
    })
}

/// The single lobby `user` plays in, if any. Two or more is a consistency
/// violation: it indicates a prior bug and fails the operation.
fn find_player_lobby(
    lobbies: &HashMap<LobbyId, Lobby>,
    user: UserId,
) -> Result<Option<LobbyId>, LobbyError> {
    let ids: Vec<LobbyId> = lobbies
        .values()
        .filter(|lobby| lobby.role_of(user).is_some())
        .map(|lobby| lobby.id)
        .collect();
    match ids.as_slice() {
        [] => Ok(None),
        [id] => Ok(Some(*id)),
        many => {
            tracing::error!(
                user_id = %user,
                lobby_count = many.len(),
                "User is bound to multiple lobbies"
            );
            Err(LobbyError::Consistency(format!(
                "user {} is bound to {} lobbies at once",
                user,
                many.len()
            )))
        }
    }
}

fn classify_removal(lobby: &Lobby, actor: UserId) -> Result<Removal, LobbyError> {
    if lobby.is_spectator(actor) {
        return Ok(Removal::Spectator);
    }
    let role = lobby.role_of(actor).ok_or(LobbyError::NotInLobby)?;
    if role == PlayerRole::Player1 || lobby.game_started || lobby.matchmaking {
        Ok(Removal::Disband)
    } else {
        Ok(Removal::PartialPlayer2)
    }
}
