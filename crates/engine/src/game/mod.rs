//! Game session adapter: binds a lobby to one running engine instance.
//!
//! One session per lobby, created when both players are ready and destroyed
//! exactly once, whether the win threshold is reached, a player forfeits,
//! or a disconnect races normal completion. The tick task owns the engine
//! outright; input and spectator updates reach it over channels, so engine
//! access needs no locking.

pub mod pong;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use rallyd_domain::{ConnectionId, Lobby, LobbyError, LobbyId, PlayerRole, UserId};
use rallyd_shared::{LobbyDto, PaddleMove, ServerMessage, Winner};

use crate::dispatch::{DispatchTarget, Dispatcher};
use crate::ports::{EngineFactory, HistoryPort, MatchRecord};

/// Emitted by a tick task when a score reaches the win threshold. Drained
/// by the lobby finalizer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOver {
    pub lobby_id: LobbyId,
}

/// Final result of a torn-down session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOutcome {
    pub winner: Winner,
    pub score1: u32,
    pub score2: u32,
}

struct SessionHandle {
    connection1: ConnectionId,
    connection2: ConnectionId,
    input_tx: mpsc::UnboundedSender<(PlayerRole, PaddleMove)>,
    spectator_tx: mpsc::UnboundedSender<Vec<ConnectionId>>,
    scores: Arc<RwLock<(u32, u32)>>,
    task: JoinHandle<()>,
}

pub struct GameSessionManager {
    sessions: RwLock<HashMap<LobbyId, SessionHandle>>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<dyn HistoryPort>,
    factory: Arc<dyn EngineFactory>,
    game_over_tx: mpsc::UnboundedSender<GameOver>,
    win_score: u32,
    tick_period: Duration,
}

impl GameSessionManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        history: Arc<dyn HistoryPort>,
        factory: Arc<dyn EngineFactory>,
        game_over_tx: mpsc::UnboundedSender<GameOver>,
        win_score: u32,
        tick_period: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            dispatcher,
            history,
            factory,
            game_over_tx,
            win_score,
            tick_period,
        }
    }

    /// Start the session for `lobby` and spawn its tick task.
    ///
    /// Starting over a live session is a consistency violation: it indicates
    /// a prior bug and fails the operation.
    pub async fn start(&self, lobby: &Lobby) -> Result<(), LobbyError> {
        let connections = lobby.player_connections();
        let &[connection1, connection2] = connections.as_slice() else {
            return Err(LobbyError::Consistency(format!(
                "lobby {} started a game without two bound player connections",
                lobby.id
            )));
        };

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&lobby.id) {
            return Err(LobbyError::Consistency(format!(
                "a game session already exists for lobby {}",
                lobby.id
            )));
        }

        let engine = self.factory.create();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (spectator_tx, spectator_rx) = mpsc::unbounded_channel();
        let scores = Arc::new(RwLock::new((0, 0)));

        let task = tokio::spawn(run_tick_loop(TickLoop {
            lobby_id: lobby.id,
            engine,
            connection1,
            connection2,
            spectators: lobby.spectator_connections(),
            input_rx,
            spectator_rx,
            scores: scores.clone(),
            dispatcher: self.dispatcher.clone(),
            game_over_tx: self.game_over_tx.clone(),
            win_score: self.win_score,
            tick_period: self.tick_period,
        }));

        sessions.insert(
            lobby.id,
            SessionHandle {
                connection1,
                connection2,
                input_tx,
                spectator_tx,
                scores,
                task,
            },
        );
        tracing::info!(lobby_id = %lobby.id, "Game session started");
        Ok(())
    }

    /// Forward a parsed move from one of the two player connections.
    /// Input from any other connection is dropped.
    pub async fn apply_input(
        &self,
        lobby_id: LobbyId,
        connection_id: ConnectionId,
        mv: PaddleMove,
    ) {
        let sessions = self.sessions.read().await;
        let Some(handle) = sessions.get(&lobby_id) else {
            return;
        };
        let role = if connection_id == handle.connection1 {
            PlayerRole::Player1
        } else if connection_id == handle.connection2 {
            PlayerRole::Player2
        } else {
            return;
        };
        let _ = handle.input_tx.send((role, mv));
    }

    /// Inform the running session of the current spectator connection set.
    /// Best-effort: a no-op when no session exists.
    pub async fn update_spectators(&self, lobby_id: LobbyId, connections: Vec<ConnectionId>) {
        let sessions = self.sessions.read().await;
        if let Some(handle) = sessions.get(&lobby_id) {
            let _ = handle.spectator_tx.send(connections);
        }
    }

    /// Tear down the session for `lobby`, determine the winner, and hand the
    /// final snapshot to the history collaborator.
    ///
    /// Idempotent: returns None when no session exists for the id, which
    /// happens when a disconnect races normal completion.
    pub async fn end(&self, lobby: &Lobby, leaving_user: Option<UserId>) -> Option<GameOutcome> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&lobby.id)?
        };
        handle.task.abort();
        let (score1, score2) = *handle.scores.read().await;

        let winner = match leaving_user.and_then(|user| lobby.role_of(user)) {
            // Forfeiture: the remaining player wins regardless of score.
            Some(PlayerRole::Player1) => Winner::Player2,
            Some(PlayerRole::Player2) => Winner::Player1,
            None => {
                if score1 > score2 {
                    Winner::Player1
                } else if score2 > score1 {
                    Winner::Player2
                } else {
                    Winner::Tie
                }
            }
        };

        let outcome = GameOutcome {
            winner,
            score1,
            score2,
        };
        tracing::info!(
            lobby_id = %lobby.id,
            winner = ?winner,
            score1,
            score2,
            "Game session ended"
        );

        if let Err(e) = self
            .history
            .record(MatchRecord {
                lobby: LobbyDto::from(lobby),
                winner,
                score1,
                score2,
                finished_at: Utc::now(),
            })
            .await
        {
            tracing::error!(lobby_id = %lobby.id, error = %e, "Failed to record match history");
        }

        Some(outcome)
    }

    pub async fn is_running(&self, lobby_id: LobbyId) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&lobby_id)
    }
}

struct TickLoop {
    lobby_id: LobbyId,
    engine: Box<dyn crate::ports::GameEngine>,
    connection1: ConnectionId,
    connection2: ConnectionId,
    spectators: Vec<ConnectionId>,
    input_rx: mpsc::UnboundedReceiver<(PlayerRole, PaddleMove)>,
    spectator_rx: mpsc::UnboundedReceiver<Vec<ConnectionId>>,
    scores: Arc<RwLock<(u32, u32)>>,
    dispatcher: Arc<Dispatcher>,
    game_over_tx: mpsc::UnboundedSender<GameOver>,
    win_score: u32,
    tick_period: Duration,
}

/// Advance the engine at a fixed rate by measured elapsed time, fan each
/// frame out to players and spectators, and fire the game-over signal
/// exactly once when a score reaches the threshold.
async fn run_tick_loop(mut lp: TickLoop) {
    let mut interval = tokio::time::interval(lp.tick_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let dt = last.elapsed().as_secs_f64();
                last = Instant::now();

                let frame = lp.engine.advance(dt);
                *lp.scores.write().await = (frame.score1, frame.score2);

                let mut targets = vec![lp.connection1, lp.connection2];
                targets.extend(lp.spectators.iter().copied());
                lp.dispatcher
                    .dispatch(
                        DispatchTarget::Connections(targets),
                        &ServerMessage::GameState {
                            lobby_id: lp.lobby_id,
                            frame,
                        },
                    )
                    .await;

                if frame.score1 >= lp.win_score || frame.score2 >= lp.win_score {
                    let _ = lp.game_over_tx.send(GameOver { lobby_id: lp.lobby_id });
                    break;
                }
            }
            input = lp.input_rx.recv() => match input {
                Some((role, mv)) => lp.engine.apply_input(role, mv),
                // Session handle dropped: the session was torn down.
                None => break,
            },
            update = lp.spectator_rx.recv() => match update {
                Some(connections) => lp.spectators = connections,
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rallyd_domain::{UserId, UserRef};
    use rallyd_shared::GameFrame;

    use crate::api::connections::{ConnectionInfo, ConnectionRegistry};
    use crate::ports::memory::InMemoryHistory;
    use crate::ports::{GameEngine, MockEngineFactory};

    /// Engine double whose player-one score climbs by one per tick.
    struct ScriptedEngine {
        score1: Arc<AtomicU32>,
    }

    impl GameEngine for ScriptedEngine {
        fn advance(&mut self, _dt: f64) -> GameFrame {
            let score1 = self.score1.fetch_add(1, Ordering::SeqCst) + 1;
            GameFrame {
                ball_x: 0.5,
                ball_y: 0.5,
                paddle1_y: 0.5,
                paddle2_y: 0.5,
                score1,
                score2: 0,
            }
        }

        fn apply_input(&mut self, _side: PlayerRole, _mv: PaddleMove) {}

        fn score_of(&self, side: PlayerRole) -> u32 {
            match side {
                PlayerRole::Player1 => self.score1.load(Ordering::SeqCst),
                PlayerRole::Player2 => 0,
            }
        }
    }

    struct Fixture {
        manager: Arc<GameSessionManager>,
        history: Arc<InMemoryHistory>,
        game_over_rx: mpsc::UnboundedReceiver<GameOver>,
        registry: Arc<ConnectionRegistry>,
    }

    fn fixture(win_score: u32) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let history = Arc::new(InMemoryHistory::new());
        let mut factory = MockEngineFactory::new();
        factory.expect_create().returning(|| {
            Box::new(ScriptedEngine {
                score1: Arc::new(AtomicU32::new(0)),
            })
        });
        let (game_over_tx, game_over_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(GameSessionManager::new(
            dispatcher,
            history.clone(),
            Arc::new(factory),
            game_over_tx,
            win_score,
            Duration::from_millis(2),
        ));
        Fixture {
            manager,
            history,
            game_over_rx,
            registry,
        }
    }

    async fn connected_lobby(
        registry: &ConnectionRegistry,
    ) -> (Lobby, Vec<mpsc::UnboundedReceiver<ServerMessage>>) {
        let alice = UserRef::new(UserId::new(), "alice");
        let bob = UserRef::new(UserId::new(), "bob");
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        let mut receivers = Vec::new();
        for (user, conn) in [(alice.clone(), conn_a), (bob.clone(), conn_b)] {
            let (tx, rx) = mpsc::unbounded_channel();
            receivers.push(rx);
            registry
                .register(
                    ConnectionInfo::new(conn, user, Utc::now() + chrono::Duration::hours(1)),
                    tx,
                )
                .await;
        }
        let mut lobby = Lobby::new_matched(alice, conn_a, bob, conn_b, 8);
        let p1 = lobby.player1.user.id;
        let p2 = lobby.player2.as_ref().map(|p| p.user.id).expect("seated");
        let _ = lobby.set_ready(p1);
        let _ = lobby.set_ready(p2);
        lobby.begin_game().expect("both ready");
        (lobby, receivers)
    }

    #[tokio::test]
    async fn threshold_fires_game_over_exactly_once() {
        let mut fx = fixture(3);
        let (lobby, _receivers) = connected_lobby(&fx.registry).await;
        fx.manager.start(&lobby).await.expect("start");

        let over = fx.game_over_rx.recv().await.expect("game over signal");
        assert_eq!(over.lobby_id, lobby.id);

        // The loop exits after the threshold; no second signal arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fx.game_over_rx.try_recv().is_err());

        let outcome = fx.manager.end(&lobby, None).await.expect("outcome");
        assert_eq!(outcome.winner, Winner::Player1);
        assert_eq!(outcome.score1, 3);
        assert_eq!(fx.history.records().await.len(), 1);
    }

    #[tokio::test]
    async fn double_start_is_a_consistency_violation() {
        let fx = fixture(1000);
        let (lobby, _receivers) = connected_lobby(&fx.registry).await;
        fx.manager.start(&lobby).await.expect("start");

        let err = fx.manager.start(&lobby).await.expect_err("second start");
        assert!(err.is_consistency_violation());

        fx.manager.end(&lobby, None).await;
    }

    #[tokio::test]
    async fn forfeit_awards_the_remaining_player() {
        let fx = fixture(1000);
        let (lobby, _receivers) = connected_lobby(&fx.registry).await;
        fx.manager.start(&lobby).await.expect("start");

        let leaver = lobby.player1.user.id;
        let outcome = fx.manager.end(&lobby, Some(leaver)).await.expect("outcome");
        assert_eq!(outcome.winner, Winner::Player2);
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let fx = fixture(1000);
        let (lobby, _receivers) = connected_lobby(&fx.registry).await;
        fx.manager.start(&lobby).await.expect("start");

        assert!(fx.manager.end(&lobby, None).await.is_some());
        assert!(fx.manager.end(&lobby, None).await.is_none());
        assert!(!fx.manager.is_running(lobby.id).await);
    }

    #[tokio::test]
    async fn equal_scores_end_in_a_tie() {
        let fx = fixture(1000);
        let (lobby, _receivers) = connected_lobby(&fx.registry).await;
        fx.manager.start(&lobby).await.expect("start");

        // Tear down before any tick can land a point.
        let outcome = fx.manager.end(&lobby, None).await.expect("outcome");
        if outcome.score1 == outcome.score2 {
            assert_eq!(outcome.winner, Winner::Tie);
        }
    }
}
