//! Event fan-out over the connection registry.
//!
//! Every state-change broadcast in the engine funnels through
//! [`Dispatcher::dispatch`], which resolves a [`DispatchTarget`] into
//! concrete connection sends and records delivery counts.

use std::sync::Arc;

use rallyd_domain::{ConnectionId, UserId};
use rallyd_shared::ServerMessage;

use crate::api::connections::ConnectionRegistry;

/// Connections a message should be delivered to. Connection ids stay inside
/// the engine; the wire protocol never carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Every registered connection
    All,
    /// Every connection owned by one user
    User(UserId),
    /// A lobby's member connections minus an ignore-list
    LobbyMembers {
        members: Vec<ConnectionId>,
        exclude: Vec<ConnectionId>,
    },
    /// An explicit connection list (e.g. matchmaking pairing announcements)
    Connections(Vec<ConnectionId>),
}

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `target` and send `message` to each resolved connection.
    ///
    /// Returns the number of connections the message was delivered to.
    /// Zero delivered against a non-empty target set is an anomaly: a
    /// legitimately disconnected user should have been short-circuited
    /// before reaching dispatch.
    pub async fn dispatch(&self, target: DispatchTarget, message: &ServerMessage) -> usize {
        let targets = self.resolve(&target).await;
        let mut delivered = 0;
        for connection_id in &targets {
            if self.registry.send(*connection_id, message).await {
                delivered += 1;
            }
        }

        tracing::debug!(
            kind = message.kind(),
            targets = targets.len(),
            delivered,
            "Dispatched event"
        );
        if delivered == 0 && !targets.is_empty() {
            tracing::warn!(
                kind = message.kind(),
                targets = targets.len(),
                "Dispatch delivered to no connection"
            );
        }
        delivered
    }

    async fn resolve(&self, target: &DispatchTarget) -> Vec<ConnectionId> {
        match target {
            DispatchTarget::All => self.registry.all_connection_ids().await,
            DispatchTarget::User(user_id) => self
                .registry
                .connections_of(*user_id)
                .await
                .into_iter()
                .map(|info| info.connection_id)
                .collect(),
            DispatchTarget::LobbyMembers { members, exclude } => members
                .iter()
                .filter(|id| !exclude.contains(id))
                .copied()
                .collect(),
            DispatchTarget::Connections(ids) => ids.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    use rallyd_domain::{UserId, UserRef};

    use crate::api::connections::ConnectionInfo;

    async fn connect(
        registry: &ConnectionRegistry,
        user: &UserRef,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = ConnectionInfo::new(
            ConnectionId::new(),
            user.clone(),
            Utc::now() + Duration::hours(1),
        );
        let connection_id = info.connection_id;
        registry.register(info, tx).await;
        (connection_id, rx)
    }

    #[tokio::test]
    async fn user_target_reaches_every_device() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = UserRef::new(UserId::new(), "alice");
        let (_c1, mut rx1) = connect(&registry, &alice).await;
        let (_c2, mut rx2) = connect(&registry, &alice).await;

        let delivered = dispatcher
            .dispatch(DispatchTarget::User(alice.id), &ServerMessage::Pong)
            .await;

        assert_eq!(delivered, 2);
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Pong)));
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Pong)));
    }

    #[tokio::test]
    async fn lobby_target_honors_exclusions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = UserRef::new(UserId::new(), "alice");
        let bob = UserRef::new(UserId::new(), "bob");
        let (c1, mut rx1) = connect(&registry, &alice).await;
        let (c2, mut rx2) = connect(&registry, &bob).await;

        let delivered = dispatcher
            .dispatch(
                DispatchTarget::LobbyMembers {
                    members: vec![c1, c2],
                    exclude: vec![c1],
                },
                &ServerMessage::Pong,
            )
            .await;

        assert_eq!(delivered, 1);
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Pong)));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn explicit_connection_list_is_exact() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = UserRef::new(UserId::new(), "alice");
        let (c1, mut rx1) = connect(&registry, &alice).await;
        // Second device stays silent even though the user matches.
        let (_c2, mut rx2) = connect(&registry, &alice).await;

        let delivered = dispatcher
            .dispatch(DispatchTarget::Connections(vec![c1]), &ServerMessage::Pong)
            .await;

        assert_eq!(delivered, 1);
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Pong)));
        assert!(rx2.try_recv().is_err());
    }
}
