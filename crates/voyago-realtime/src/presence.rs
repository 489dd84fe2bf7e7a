//! Process-local presence registry.
//!
//! Tracks which user identities currently have a live realtime connection
//! on *this* process, and the outbound handle to reach each one.  Entries
//! are never persisted; absence simply means "not connected here" and the
//! caller falls back to the fan-out relay for other processes.
//!
//! The registry is keyed primarily by [`ConnectionId`], with the user
//! identity as a secondary index.  Disconnect removal is therefore a direct
//! keyed delete rather than a scan over identities, and a stale index entry
//! left behind by a reconnect can never unbind the newer connection.
//!
//! Mutation happens only from the gateway's connection lifecycle; business
//! logic reads via [`PresenceRegistry::lookup`] / [`PresenceRegistry::list_all`].

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::{is_addressable, OutboundEvent};

/// Identifier for one accepted socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The handle used to push events down one connection.
pub type ConnectionHandle = UnboundedSender<OutboundEvent>;

struct ConnectionEntry {
    /// `None` for connections that supplied no usable identity: they stay
    /// open (and receive broadcasts) but cannot be addressed by unicast.
    user_id: Option<String>,
    handle: ConnectionHandle,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<String, ConnectionId>,
}

/// Process-local presence map.  Constructed at gateway start, cleared at
/// shutdown.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<RegistryInner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection, registering presence when `user_id` is a
    /// usable identity.  Returns the registered identity, or `None` when
    /// the connection was accepted anonymously.
    ///
    /// A repeat identity overwrites: the newer connection becomes the
    /// addressable one and the older connection loses its identity binding
    /// (it stays connected and keeps receiving broadcasts).
    pub async fn register(
        &self,
        connection: ConnectionId,
        user_id: Option<&str>,
        handle: ConnectionHandle,
    ) -> Option<String> {
        let identity = user_id.filter(|id| is_addressable(id)).map(str::to_string);

        let mut inner = self.inner.write().await;

        if let Some(id) = &identity {
            if let Some(previous) = inner.by_user.insert(id.clone(), connection) {
                if previous != connection {
                    if let Some(entry) = inner.connections.get_mut(&previous) {
                        entry.user_id = None;
                    }
                }
            }
        }

        inner.connections.insert(
            connection,
            ConnectionEntry {
                user_id: identity.clone(),
                handle,
            },
        );

        identity
    }

    /// Remove a connection on disconnect.  Returns the identity that went
    /// offline, if the connection was registered.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<String> {
        let mut inner = self.inner.write().await;

        let entry = inner.connections.remove(&connection)?;
        if let Some(id) = &entry.user_id {
            // Drop the index entry only if it still points at this
            // connection; a reconnect may already own the identity.
            if inner.by_user.get(id) == Some(&connection) {
                inner.by_user.remove(id);
            }
        }
        entry.user_id
    }

    /// Find the handle for a connected identity, if it is connected to this
    /// process.
    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().await;
        let connection = inner.by_user.get(user_id)?;
        inner
            .connections
            .get(connection)
            .map(|entry| entry.handle.clone())
    }

    /// All identities currently registered on this process.
    pub async fn list_all(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.by_user.keys().cloned().collect()
    }

    /// Handles for every tracked connection, addressable or not.  Used for
    /// process-local broadcast.
    pub async fn handles(&self) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Number of tracked connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Drop every entry.  Shutdown hook.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.connections.clear();
        inner.by_user.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<OutboundEvent>) {
        mpsc::unbounded_channel()
    }

    async fn sorted_list(registry: &PresenceRegistry) -> Vec<String> {
        let mut list = registry.list_all().await;
        list.sort();
        list
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let conn = ConnectionId::new();
        let (tx, _rx) = handle();

        assert_eq!(
            registry.register(conn, Some("u1"), tx).await,
            Some("u1".to_string())
        );
        assert!(registry.lookup("u1").await.is_some());

        assert_eq!(registry.unregister(conn).await, Some("u1".to_string()));
        assert!(registry.lookup("u1").await.is_none());
        assert!(registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn placeholder_identities_are_never_listed() {
        let registry = PresenceRegistry::new();

        let (tx1, _rx1) = handle();
        let (tx2, _rx2) = handle();
        let (tx3, _rx3) = handle();

        assert_eq!(registry.register(ConnectionId::new(), None, tx1).await, None);
        assert_eq!(
            registry
                .register(ConnectionId::new(), Some("undefined"), tx2)
                .await,
            None
        );
        assert_eq!(
            registry.register(ConnectionId::new(), Some(""), tx3).await,
            None
        );

        assert!(registry.list_all().await.is_empty());
        // The connections themselves are still tracked for broadcast.
        assert_eq!(registry.connection_count().await, 3);
    }

    #[tokio::test]
    async fn connect_disconnect_scenario() {
        let registry = PresenceRegistry::new();
        let conn1 = ConnectionId::new();
        let conn2 = ConnectionId::new();
        let (tx1, _rx1) = handle();
        let (tx2, _rx2) = handle();

        registry.register(conn1, Some("u1"), tx1).await;
        assert_eq!(sorted_list(&registry).await, ["u1"]);

        registry.register(conn2, Some("u2"), tx2).await;
        assert_eq!(sorted_list(&registry).await, ["u1", "u2"]);

        registry.unregister(conn1).await;
        assert_eq!(sorted_list(&registry).await, ["u2"]);
    }

    #[tokio::test]
    async fn reconnect_overwrites_without_ambiguity() {
        let registry = PresenceRegistry::new();
        let old_conn = ConnectionId::new();
        let new_conn = ConnectionId::new();
        let (old_tx, _old_rx) = handle();
        let (new_tx, mut new_rx) = handle();

        registry.register(old_conn, Some("u1"), old_tx).await;
        registry.register(new_conn, Some("u1"), new_tx).await;

        // Unicast reaches the newer connection.
        let found = registry.lookup("u1").await.unwrap();
        found
            .send(OutboundEvent::new("ping", serde_json::Value::Null))
            .unwrap();
        assert!(new_rx.try_recv().is_ok());

        // The stale connection disconnecting must not unbind the new one.
        assert_eq!(registry.unregister(old_conn).await, None);
        assert!(registry.lookup("u1").await.is_some());
        assert_eq!(sorted_list(&registry).await, ["u1"]);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = handle();
        registry.register(ConnectionId::new(), Some("u1"), tx).await;

        registry.clear().await;
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.list_all().await.is_empty());
    }
}
