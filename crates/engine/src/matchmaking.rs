//! Matchmaking queue: a waiting pool drained by a periodic poll.
//!
//! Pairing is FIFO over insertion order, deliberately not skill- or
//! history-aware. The poll task is started lazily on the first enqueue,
//! stops itself once the queue drains, and is single-flighted: one task
//! owns the interval, so overlapping ticks cannot double-pair an entry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use rallyd_domain::{ConnectionId, LobbyError, UserId, UserRef};
use rallyd_shared::ServerMessage;

use crate::api::connections::ConnectionRegistry;
use crate::dispatch::{DispatchTarget, Dispatcher};
use crate::session::LobbyManager;

struct QueueEntry {
    user: UserRef,
    connection: ConnectionId,
}

struct QueueInner {
    entries: Vec<QueueEntry>,
    running: bool,
}

pub struct MatchmakingQueue {
    inner: Mutex<QueueInner>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    lobbies: Arc<LobbyManager>,
    poll_period: Duration,
}

impl MatchmakingQueue {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        lobbies: Arc<LobbyManager>,
        poll_period: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: Vec::new(),
                running: false,
            }),
            registry,
            dispatcher,
            lobbies,
            poll_period,
        }
    }

    /// Enqueue `user` on `connection` and acknowledge on that connection
    /// only. Starts the poll task when it is not already running.
    pub async fn add(
        self: &Arc<Self>,
        user: UserRef,
        connection: ConnectionId,
    ) -> Result<(), LobbyError> {
        let connections = self.registry.connections_of(user.id).await;
        if connections.is_empty() {
            return Err(LobbyError::NotConnected);
        }
        if self.registry.presence_of(user.id).await.blocks_matchmaking() {
            return Err(LobbyError::AlreadyInGame);
        }
        if !connections.iter().any(|c| c.connection_id == connection) {
            return Err(LobbyError::NotOnline);
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.entries.iter().any(|e| e.user.id == user.id) {
                return Err(LobbyError::AlreadyInQueue);
            }
            inner.entries.push(QueueEntry {
                user: user.clone(),
                connection,
            });
            if !inner.running {
                inner.running = true;
                tokio::spawn(Self::run(self.clone()));
            }
        }
        tracing::info!(user_id = %user.id, "User entered matchmaking queue");

        self.dispatcher
            .dispatch(
                DispatchTarget::Connections(vec![connection]),
                &ServerMessage::MatchmakingWaiting,
            )
            .await;
        Ok(())
    }

    /// Remove `user` from the queue. Returns whether anything was removed.
    /// Used both for explicit cancel and disconnect cleanup.
    pub async fn remove(&self, user: UserId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        inner.entries.retain(|e| e.user.id != user);
        let removed = inner.entries.len() != before;
        if removed {
            tracing::info!(user_id = %user, "User left matchmaking queue");
        }
        removed
    }

    pub async fn waiting_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.entries.len()
    }

    /// Poll loop: pair the two longest-waiting entries in stable insertion
    /// order, stop once the queue is empty.
    async fn run(queue: Arc<Self>) {
        tracing::debug!("Matchmaking poll loop started");
        let mut interval = tokio::time::interval(queue.poll_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let pair = {
                let mut inner = queue.inner.lock().await;
                if inner.entries.is_empty() {
                    inner.running = false;
                    break;
                }
                if inner.entries.len() < 2 {
                    continue;
                }
                let first = inner.entries.remove(0);
                let second = inner.entries.remove(0);
                (first, second)
            };

            let (first, second) = pair;
            let first_id = first.user.id;
            let second_id = second.user.id;
            match queue
                .lobbies
                .create_match(
                    (first.user, first.connection),
                    (second.user, second.connection),
                )
                .await
            {
                Ok(lobby) => {
                    tracing::info!(
                        lobby_id = %lobby.id,
                        player1 = %first_id,
                        player2 = %second_id,
                        "Matchmaking paired two users"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        player1 = %first_id,
                        player2 = %second_id,
                        error = %e,
                        "Failed to create matchmaking lobby"
                    );
                }
            }
        }
        tracing::debug!("Matchmaking poll loop stopped");
    }
}
