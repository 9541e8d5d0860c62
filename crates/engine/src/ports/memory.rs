//! In-memory reference adapters for the collaborator ports.
//!
//! These keep the binary runnable without external services: a token parser
//! standing in for the identity provider, and map-backed directory, history,
//! and notification stores.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use rallyd_domain::{LobbyId, Presence, UserId, UserRef};

use super::{AuthError, AuthPort, AuthedUser, HistoryPort, MatchRecord, NotificationPort, UserDirectoryPort};

/// Development token resolver.
///
/// Accepts tokens of the form `<user-uuid>:<display-name>` and grants a
/// fixed time-to-live from the moment of the handshake. Real deployments
/// put the identity provider behind this port instead.
pub struct DevTokenAuth {
    ttl: Duration,
    directory: std::sync::Arc<InMemoryUserDirectory>,
}

impl DevTokenAuth {
    pub fn new(ttl_secs: i64, directory: std::sync::Arc<InMemoryUserDirectory>) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            directory,
        }
    }
}

#[async_trait]
impl AuthPort for DevTokenAuth {
    async fn authenticate(&self, token: &str) -> Result<AuthedUser, AuthError> {
        let (raw_id, display_name) = token.split_once(':').ok_or(AuthError::InvalidToken)?;
        if display_name.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let user_id = uuid::Uuid::parse_str(raw_id)
            .map(UserId::from_uuid)
            .map_err(|_| AuthError::InvalidToken)?;
        let user = UserRef::new(user_id, display_name);
        self.directory.upsert(user.clone()).await;
        Ok(AuthedUser {
            user,
            expires_at: Utc::now() + self.ttl,
        })
    }
}

/// Map-backed user directory.
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, (UserRef, Presence)>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, user: UserRef) {
        let mut users = self.users.write().await;
        users
            .entry(user.id)
            .and_modify(|(existing, _)| *existing = user.clone())
            .or_insert((user, Presence::Offline));
    }

    pub async fn presence(&self, user_id: UserId) -> Option<Presence> {
        let users = self.users.read().await;
        users.get(&user_id).map(|(_, presence)| *presence)
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectoryPort for InMemoryUserDirectory {
    async fn find_by_id(&self, user_id: UserId) -> Option<UserRef> {
        let users = self.users.read().await;
        users.get(&user_id).map(|(user, _)| user.clone())
    }

    async fn set_presence(&self, user_id: UserId, presence: Presence) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        if let Some((_, current)) = users.get_mut(&user_id) {
            *current = presence;
        }
        Ok(())
    }
}

/// Append-only in-memory match history.
pub struct InMemoryHistory {
    records: Mutex<Vec<MatchRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().await.clone()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryPort for InMemoryHistory {
    async fn record(&self, record: MatchRecord) -> anyhow::Result<()> {
        tracing::info!(
            lobby_id = %record.lobby.id,
            winner = ?record.winner,
            score1 = record.score1,
            score2 = record.score2,
            "Recorded finished match"
        );
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Invite notification log.
pub struct InMemoryNotifications {
    pending: Mutex<Vec<(UserId, UserId, LobbyId)>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn pending_for(&self, to: UserId) -> usize {
        self.pending
            .lock()
            .await
            .iter()
            .filter(|(_, t, _)| *t == to)
            .count()
    }
}

impl Default for InMemoryNotifications {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationPort for InMemoryNotifications {
    async fn notify_invite(
        &self,
        from: &UserRef,
        to: UserId,
        lobby_id: LobbyId,
    ) -> anyhow::Result<()> {
        self.pending.lock().await.push((from.id, to, lobby_id));
        Ok(())
    }

    async fn mark_invites_read(&self, from: UserId, to: UserId) -> anyhow::Result<()> {
        self.pending
            .lock()
            .await
            .retain(|(f, t, _)| !(*f == from && *t == to));
        Ok(())
    }
}
