//! Shared application state and configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::connections::ConnectionRegistry;
use crate::dispatch::Dispatcher;
use crate::game::GameSessionManager;
use crate::matchmaking::MatchmakingQueue;
use crate::ports::{
    AuthPort, EngineFactory, HistoryPort, NotificationPort, UserDirectoryPort,
};
use crate::session::{spawn_game_over_worker, LobbyManager};

/// Engine configuration, loaded from the environment with defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub max_spectators: usize,
    pub win_score: u32,
    pub tick_hz: u32,
    pub matchmaking_poll: Duration,
    pub token_ttl_secs: i64,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("SERVER_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            max_spectators: env_parse("MAX_SPECTATORS", 20),
            win_score: env_parse("WIN_SCORE", 11),
            tick_hz: env_parse("TICK_HZ", 60),
            matchmaking_poll: Duration::from_millis(env_parse("MATCHMAKING_POLL_MS", 100)),
            token_ttl_secs: env_parse("TOKEN_TTL_SECS", 3600),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_spectators: 20,
            win_score: 11,
            tick_hz: 60,
            matchmaking_poll: Duration::from_millis(100),
            token_ttl_secs: 3600,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Shared state handed to every handler.
pub struct AppState {
    pub config: EngineConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub games: Arc<GameSessionManager>,
    pub lobbies: Arc<LobbyManager>,
    pub queue: Arc<MatchmakingQueue>,
    pub auth: Arc<dyn AuthPort>,
}

impl AppState {
    /// Wire the managers together and spawn the game-over worker.
    pub fn new(
        config: EngineConfig,
        auth: Arc<dyn AuthPort>,
        directory: Arc<dyn UserDirectoryPort>,
        history: Arc<dyn HistoryPort>,
        notifications: Arc<dyn NotificationPort>,
        engine_factory: Arc<dyn EngineFactory>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));

        let (game_over_tx, game_over_rx) = mpsc::unbounded_channel();
        let games = Arc::new(GameSessionManager::new(
            dispatcher.clone(),
            history,
            engine_factory,
            game_over_tx,
            config.win_score,
            config.tick_period(),
        ));
        let lobbies = Arc::new(LobbyManager::new(
            registry.clone(),
            dispatcher.clone(),
            games.clone(),
            directory,
            notifications,
            config.max_spectators,
        ));
        spawn_game_over_worker(lobbies.clone(), game_over_rx);

        let queue = Arc::new(MatchmakingQueue::new(
            registry.clone(),
            dispatcher.clone(),
            lobbies.clone(),
            config.matchmaking_poll,
        ));

        Arc::new(Self {
            config,
            registry,
            dispatcher,
            games,
            lobbies,
            queue,
            auth,
        })
    }
}
