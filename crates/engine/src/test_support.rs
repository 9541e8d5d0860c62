//! Shared fixtures for engine tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use rallyd_domain::{ConnectionId, PlayerRole, UserId, UserRef};
use rallyd_shared::{GameFrame, PaddleMove, ServerMessage};

use crate::api::connections::{ConnectionInfo, ConnectionRegistry};
use crate::dispatch::Dispatcher;
use crate::game::GameSessionManager;
use crate::matchmaking::MatchmakingQueue;
use crate::ports::memory::{InMemoryHistory, InMemoryNotifications, InMemoryUserDirectory};
use crate::ports::{EngineFactory, GameEngine};
use crate::session::{spawn_game_over_worker, LobbyManager};

/// Engine double: player one's score climbs by one per advance.
pub struct ScriptedEngine {
    score1: u32,
}

impl GameEngine for ScriptedEngine {
    fn advance(&mut self, _dt: f64) -> GameFrame {
        self.score1 += 1;
        GameFrame {
            ball_x: 0.5,
            ball_y: 0.5,
            paddle1_y: 0.5,
            paddle2_y: 0.5,
            score1: self.score1,
            score2: 0,
        }
    }

    fn apply_input(&mut self, _side: PlayerRole, _mv: PaddleMove) {}

    fn score_of(&self, side: PlayerRole) -> u32 {
        match side {
            PlayerRole::Player1 => self.score1,
            PlayerRole::Player2 => 0,
        }
    }
}

pub struct ScriptedFactory;

impl EngineFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn GameEngine> {
        Box::new(ScriptedEngine { score1: 0 })
    }
}

/// Fully wired manager stack over in-memory collaborators.
pub struct Harness {
    pub registry: Arc<ConnectionRegistry>,
    pub games: Arc<GameSessionManager>,
    pub lobbies: Arc<LobbyManager>,
    pub queue: Arc<MatchmakingQueue>,
    pub directory: Arc<InMemoryUserDirectory>,
    pub notifications: Arc<InMemoryNotifications>,
    pub history: Arc<InMemoryHistory>,
}

impl Harness {
    pub fn new(win_score: u32) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let directory = Arc::new(InMemoryUserDirectory::new());
        let notifications = Arc::new(InMemoryNotifications::new());
        let history = Arc::new(InMemoryHistory::new());

        let (game_over_tx, game_over_rx) = mpsc::unbounded_channel();
        let games = Arc::new(GameSessionManager::new(
            dispatcher.clone(),
            history.clone(),
            Arc::new(ScriptedFactory),
            game_over_tx,
            win_score,
            Duration::from_millis(2),
        ));
        let lobbies = Arc::new(LobbyManager::new(
            registry.clone(),
            dispatcher.clone(),
            games.clone(),
            directory.clone(),
            notifications.clone(),
            8,
        ));
        spawn_game_over_worker(lobbies.clone(), game_over_rx);
        let queue = Arc::new(MatchmakingQueue::new(
            registry.clone(),
            dispatcher.clone(),
            lobbies.clone(),
            Duration::from_millis(5),
        ));

        Self {
            registry,
            games,
            lobbies,
            queue,
            directory,
            notifications,
            history,
        }
    }

    /// Register a fresh user with one live connection.
    pub async fn connect(
        &self,
        name: &str,
    ) -> (UserRef, ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let user = UserRef::new(UserId::new(), name);
        let (connection_id, rx) = self.connect_as(&user).await;
        (user, connection_id, rx)
    }

    /// Register an additional connection for an existing user.
    pub async fn connect_as(
        &self,
        user: &UserRef,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        self.directory.upsert(user.clone()).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(
            ConnectionId::new(),
            user.clone(),
            Utc::now() + ChronoDuration::hours(1),
        );
        let connection_id = info.connection_id;
        self.registry.register(info, tx).await;
        (connection_id, rx)
    }
}

/// Everything currently buffered on a client channel.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Poll `cond` until it holds or a generous deadline passes.
pub async fn wait_until<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
