//! Connection management for WebSocket clients.
//!
//! Tracks every open, authenticated connection, its owner, its credential
//! expiry, and its current lobby affiliation. The registry exclusively owns
//! connections; lobbies refer to them only by id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use rallyd_domain::{ConnectionId, LobbyId, Presence, UserId, UserRef};
use rallyd_shared::ServerMessage;

/// A connection's link to a lobby, written onto the connection (never the
/// reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbyAffiliation {
    pub lobby_id: LobbyId,
    pub spectator: bool,
}

/// Information about a connected client.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique ID for this connection (distinct from the user id)
    pub connection_id: ConnectionId,
    /// The authenticated owner
    pub user: UserRef,
    /// Cached credential expiry, checked lazily at send time
    pub expires_at: DateTime<Utc>,
    /// The lobby this connection is bound to (if any)
    pub affiliation: Option<LobbyAffiliation>,
}

impl ConnectionInfo {
    pub fn new(connection_id: ConnectionId, user: UserRef, expires_at: DateTime<Utc>) -> Self {
        Self {
            connection_id,
            user,
            expires_at,
            affiliation: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Manages all active WebSocket connections.
///
/// A user may own zero or many connections (multi-device). Registration and
/// unregistration are idempotent with respect to duplicate calls for the
/// same connection id.
pub struct ConnectionRegistry {
    /// Map of connection_id -> (ConnectionInfo, sender channel)
    connections: RwLock<HashMap<ConnectionId, (ConnectionInfo, mpsc::UnboundedSender<ServerMessage>)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    pub async fn register(&self, info: ConnectionInfo, sender: mpsc::UnboundedSender<ServerMessage>) {
        let mut connections = self.connections.write().await;
        let connection_id = info.connection_id;
        if connections.insert(connection_id, (info, sender)).is_some() {
            tracing::debug!(connection_id = %connection_id, "Connection re-registered");
        } else {
            tracing::debug!(connection_id = %connection_id, "Connection registered");
        }
    }

    /// Unregister a connection. Returns the removed info, if it was present.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&connection_id).map(|(info, _)| info);
        if removed.is_some() {
            tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Get connection info by ID.
    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).map(|(info, _)| info.clone())
    }

    /// All live connections owned by `user`.
    pub async fn connections_of(&self, user: UserId) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|(info, _)| info.user.id == user)
            .map(|(info, _)| info.clone())
            .collect()
    }

    /// Resolve `connection_id` only if it is a live connection owned by
    /// `user`.
    pub async fn user_connection(
        &self,
        user: UserId,
        connection_id: ConnectionId,
    ) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections
            .get(&connection_id)
            .filter(|(info, _)| info.user.id == user)
            .map(|(info, _)| info.clone())
    }

    /// Send a message to one connection.
    ///
    /// Fails closed: when the connection's credential has expired, a single
    /// `CredentialExpired` notice is pushed instead of the payload and the
    /// send reports failure. Callers must not assume delivery.
    pub async fn send(&self, connection_id: ConnectionId, message: &ServerMessage) -> bool {
        let connections = self.connections.read().await;
        let Some((info, sender)) = connections.get(&connection_id) else {
            return false;
        };
        if info.is_expired(Utc::now()) {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %info.user.id,
                "Credential expired, withholding payload"
            );
            let _ = sender.send(ServerMessage::CredentialExpired);
            return false;
        }
        if let Err(e) = sender.send(message.clone()) {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to send message"
            );
            return false;
        }
        true
    }

    /// Every registered connection id.
    pub async fn all_connection_ids(&self) -> Vec<ConnectionId> {
        let connections = self.connections.read().await;
        connections.keys().copied().collect()
    }

    /// Bind or clear a connection's lobby affiliation. Returns false when
    /// the connection is gone.
    pub async fn set_affiliation(
        &self,
        connection_id: ConnectionId,
        affiliation: Option<LobbyAffiliation>,
    ) -> bool {
        let mut connections = self.connections.write().await;
        if let Some((info, _)) = connections.get_mut(&connection_id) {
            info.affiliation = affiliation;
            true
        } else {
            false
        }
    }

    /// Clear the affiliation of every listed connection.
    pub async fn clear_affiliations(&self, connection_ids: &[ConnectionId]) {
        let mut connections = self.connections.write().await;
        for connection_id in connection_ids {
            if let Some((info, _)) = connections.get_mut(connection_id) {
                info.affiliation = None;
            }
        }
    }

    /// Classify a user's presence from their live connections.
    ///
    /// A playing affiliation wins over a spectator one; any affiliation
    /// reports as in-game; a connection with no affiliation is online;
    /// no connections at all is offline.
    pub async fn presence_of(&self, user: UserId) -> Presence {
        let connections = self.connections.read().await;
        let mut presence = Presence::Offline;
        for (info, _) in connections.values() {
            if info.user.id != user {
                continue;
            }
            match info.affiliation {
                Some(LobbyAffiliation { spectator: false, .. }) => {
                    return Presence::InGame { spectator: false };
                }
                Some(LobbyAffiliation { spectator: true, .. }) => {
                    presence = Presence::InGame { spectator: true };
                }
                None => {
                    if presence == Presence::Offline {
                        presence = Presence::Online;
                    }
                }
            }
        }
        presence
    }

}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(name: &str) -> UserRef {
        UserRef::new(UserId::new(), name)
    }

    fn live_info(user: UserRef) -> ConnectionInfo {
        ConnectionInfo::new(ConnectionId::new(), user, Utc::now() + Duration::hours(1))
    }

    #[tokio::test]
    async fn register_and_send() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let info = live_info(user("alice"));
        let connection_id = info.connection_id;
        registry.register(info, tx).await;

        assert!(registry.send(connection_id, &ServerMessage::Pong).await);
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn expired_credential_fails_closed() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut info = live_info(user("alice"));
        info.expires_at = Utc::now() - Duration::seconds(1);
        let connection_id = info.connection_id;
        registry.register(info, tx).await;

        assert!(!registry.send(connection_id, &ServerMessage::Pong).await);
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::CredentialExpired)
        ));
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(ConnectionId::new(), &ServerMessage::Pong).await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let info = live_info(user("alice"));
        let connection_id = info.connection_id;
        registry.register(info, tx).await;

        assert!(registry.unregister(connection_id).await.is_some());
        assert!(registry.unregister(connection_id).await.is_none());
    }

    #[tokio::test]
    async fn presence_tracks_affiliations() {
        let registry = ConnectionRegistry::new();
        let alice = user("alice");
        assert_eq!(registry.presence_of(alice.id).await, Presence::Offline);

        let (tx, _rx) = mpsc::unbounded_channel();
        let info = live_info(alice.clone());
        let connection_id = info.connection_id;
        registry.register(info, tx).await;
        assert_eq!(registry.presence_of(alice.id).await, Presence::Online);

        let lobby_id = LobbyId::new();
        registry
            .set_affiliation(
                connection_id,
                Some(LobbyAffiliation {
                    lobby_id,
                    spectator: true,
                }),
            )
            .await;
        assert_eq!(
            registry.presence_of(alice.id).await,
            Presence::InGame { spectator: true }
        );

        registry
            .set_affiliation(
                connection_id,
                Some(LobbyAffiliation {
                    lobby_id,
                    spectator: false,
                }),
            )
            .await;
        assert_eq!(
            registry.presence_of(alice.id).await,
            Presence::InGame { spectator: false }
        );

        registry.unregister(connection_id).await;
        assert_eq!(registry.presence_of(alice.id).await, Presence::Offline);
    }

    #[tokio::test]
    async fn user_connection_checks_ownership() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = user("alice");
        let info = live_info(alice.clone());
        let connection_id = info.connection_id;
        registry.register(info, tx).await;

        assert!(registry.user_connection(alice.id, connection_id).await.is_some());
        assert!(registry
            .user_connection(UserId::new(), connection_id)
            .await
            .is_none());
    }
}
