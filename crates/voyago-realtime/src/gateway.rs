//! Realtime gateway: connection lifecycle and event emission.
//!
//! One gateway instance exists per server process.  The transport layer
//! (the WebSocket handler in `voyago-server`) calls [`Gateway::connect`]
//! with the handshake-supplied identity and gets back a receiver to drain
//! into the socket; on socket close it calls [`Gateway::disconnect`].
//! Between those two calls the connection can be reached through the
//! emission primitives.
//!
//! The handshake identity is client-asserted: no token is verified at this
//! layer.  The gateway is expected to be reachable only from an already
//! authenticated client session; see DESIGN.md for the trust-boundary note.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::events::{OutboundEvent, EVENT_ONLINE_USERS};
use crate::fanout::{FanoutAdapter, Scope};
use crate::presence::{ConnectionId, PresenceRegistry};

/// Per-process realtime gateway.
pub struct Gateway {
    registry: PresenceRegistry,
    fanout: Option<FanoutAdapter>,
}

impl Gateway {
    /// Build a gateway.  `fanout` is `None` when the adapter could not be
    /// set up; the gateway then operates in single-process mode.
    pub fn new(fanout: Option<FanoutAdapter>) -> Self {
        if fanout.is_none() {
            warn!("gateway running without fan-out adapter; delivery is single-process only");
        }
        Self {
            registry: PresenceRegistry::new(),
            fanout,
        }
    }

    /// Accept a connection.  Returns the connection id and the receiver the
    /// transport drains into the socket.
    ///
    /// A connection without a usable identity is accepted but stays
    /// unaddressable: it receives broadcasts yet no unicast can reach it.
    /// Every successful registration re-broadcasts the online-user list to
    /// all clients.
    pub async fn connect(
        &self,
        user_id: Option<&str>,
    ) -> (ConnectionId, UnboundedReceiver<OutboundEvent>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let registered = self.registry.register(connection, user_id, tx).await;
        match &registered {
            Some(identity) => {
                info!(user = %identity, connection = %connection, "user connected");
                self.broadcast_online_users().await;
            }
            None => {
                debug!(connection = %connection, "anonymous connection accepted (no presence)");
            }
        }

        (connection, rx)
    }

    /// Drop a connection (graceful or abrupt close).  If the connection was
    /// registered, the online-user list is re-broadcast.
    pub async fn disconnect(&self, connection: ConnectionId) {
        match self.registry.unregister(connection).await {
            Some(identity) => {
                info!(user = %identity, connection = %connection, "user disconnected");
                self.broadcast_online_users().await;
            }
            None => {
                debug!(connection = %connection, "anonymous connection closed");
            }
        }
    }

    /// Identities currently connected to this process.
    pub async fn online_users(&self) -> Vec<String> {
        self.registry.list_all().await
    }

    /// Unicast an event to one user identity, wherever they are connected.
    ///
    /// Delivery is best-effort: a recipient connected to no process simply
    /// misses the push and reconciles from message history.
    pub async fn emit_to_user(&self, user_id: &str, event: &str, payload: Value) {
        let delivered = self.deliver_local(user_id, event, payload.clone()).await;
        if !delivered {
            debug!(user = %user_id, event, "recipient not connected locally");
        }

        if let Some(fanout) = &self.fanout {
            if let Err(e) = fanout
                .publish(Scope::User(user_id.to_string()), event, &payload)
                .await
            {
                warn!(error = %e, user = %user_id, event, "fan-out publish failed");
            }
        }
    }

    /// Broadcast an event to every connection on every process.
    pub async fn emit_to_all(&self, event: &str, payload: Value) {
        self.broadcast_local(event, payload.clone()).await;

        if let Some(fanout) = &self.fanout {
            if let Err(e) = fanout.publish(Scope::All, event, &payload).await {
                warn!(error = %e, event, "fan-out publish failed");
            }
        }
    }

    /// Deliver to the identity's connection on this process only.  Returns
    /// whether a local connection accepted the event.  Also the re-emit
    /// path for the fan-out listener.
    pub async fn deliver_local(&self, user_id: &str, event: &str, payload: Value) -> bool {
        match self.registry.lookup(user_id).await {
            Some(handle) => handle.send(OutboundEvent::new(event, payload)).is_ok(),
            None => false,
        }
    }

    /// Deliver to every connection on this process only.
    pub async fn broadcast_local(&self, event: &str, payload: Value) {
        for handle in self.registry.handles().await {
            // A handle whose receiver is gone is mid-disconnect; skip it.
            let _ = handle.send(OutboundEvent::new(event, payload.clone()));
        }
    }

    /// Push the current online-user list to every client.  O(connections)
    /// per join/leave, an accepted ceiling for this design.
    async fn broadcast_online_users(&self) {
        let users = self.registry.list_all().await;
        self.emit_to_all(EVENT_ONLINE_USERS, Value::from(users)).await;
    }

    /// Drop all connections.  Shutdown hook.
    pub async fn shutdown(&self) {
        self.registry.clear().await;
    }

    /// Spawn the fan-out listener for this gateway, if an adapter is
    /// attached.  Call once after wrapping the gateway in an [`Arc`].
    pub fn spawn_fanout_listener(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        self.fanout
            .as_ref()
            .map(|fanout| fanout.spawn_listener(Arc::clone(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_NEW_MESSAGE;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Single-process gateway: the fan-out adapter needs a live database
    /// and is exercised separately.
    fn gateway() -> Gateway {
        Gateway::new(None)
    }

    fn next_event(
        rx: &mut UnboundedReceiver<OutboundEvent>,
    ) -> Result<OutboundEvent, TryRecvError> {
        rx.try_recv()
    }

    #[tokio::test]
    async fn unicast_delivers_exactly_once_to_the_addressed_user() {
        let gateway = gateway();
        let (_c1, mut rx1) = gateway.connect(Some("u1")).await;
        let (_c2, mut rx2) = gateway.connect(Some("u2")).await;

        // Drain the join broadcasts.
        while next_event(&mut rx1).is_ok() {}
        while next_event(&mut rx2).is_ok() {}

        gateway
            .emit_to_user("u2", EVENT_NEW_MESSAGE, serde_json::json!({ "body": "hello" }))
            .await;

        let event = next_event(&mut rx2).expect("u2 should receive the event");
        assert_eq!(event.event, EVENT_NEW_MESSAGE);
        assert_eq!(event.data["body"], "hello");
        assert!(next_event(&mut rx2).is_err(), "exactly once");
        assert!(next_event(&mut rx1).is_err(), "not delivered to u1");
    }

    #[tokio::test]
    async fn new_message_event_carries_body_and_attachments() {
        use chrono::Utc;
        use uuid::Uuid;
        use voyago_store::{
            Attachment, MediaKind, Message, MessageWithAttachments, UserSummary,
        };

        let gateway = gateway();
        let (_c1, mut rx1) = gateway.connect(Some("u1")).await;
        let (_c2, mut rx2) = gateway.connect(Some("u2")).await;
        while next_event(&mut rx1).is_ok() {}
        while next_event(&mut rx2).is_ok() {}

        // The payload shape the send handler pushes: a stored message with
        // one image attachment and the sender summary.
        let message_id = Uuid::new_v4();
        let stored = MessageWithAttachments {
            message: Message {
                id: message_id,
                conversation_id: Uuid::new_v4(),
                sender_id: "u1".to_string(),
                body: Some("hello".to_string()),
                seq: 1,
                created_at: Utc::now(),
            },
            attachments: vec![Attachment {
                id: Uuid::new_v4(),
                message_id,
                kind: MediaKind::Image,
                url: "/uploads/beach.png".to_string(),
                mime_type: "image/png".to_string(),
                file_name: "beach.png".to_string(),
                file_size: 2048,
                width: Some(640),
                height: Some(480),
                duration_secs: None,
                metadata: serde_json::json!({ "storage": "local" }),
            }],
            sender: Some(UserSummary {
                id: "u1".to_string(),
                name: "Traveler One".to_string(),
                image_url: None,
            }),
        };

        let payload = serde_json::to_value(&stored).unwrap();
        gateway.emit_to_user("u2", EVENT_NEW_MESSAGE, payload).await;

        let event = next_event(&mut rx2).expect("u2 should receive the event");
        assert_eq!(event.event, EVENT_NEW_MESSAGE);
        assert_eq!(event.data["body"], "hello");
        assert_eq!(event.data["attachments"].as_array().unwrap().len(), 1);
        assert_eq!(event.data["attachments"][0]["kind"], "IMAGE");
        assert_eq!(event.data["sender"]["id"], "u1");
        assert!(next_event(&mut rx2).is_err(), "exactly once");
        assert!(next_event(&mut rx1).is_err(), "sender channel stays quiet");
    }

    #[tokio::test]
    async fn unicast_to_absent_user_is_a_silent_noop() {
        let gateway = gateway();
        let (_c1, mut rx1) = gateway.connect(Some("u1")).await;
        while next_event(&mut rx1).is_ok() {}

        gateway
            .emit_to_user("nobody", EVENT_NEW_MESSAGE, serde_json::json!({}))
            .await;

        assert!(next_event(&mut rx1).is_err());
    }

    #[tokio::test]
    async fn online_list_follows_joins_and_leaves() {
        let gateway = gateway();

        let (c1, mut rx1) = gateway.connect(Some("u1")).await;
        let joined = next_event(&mut rx1).unwrap();
        assert_eq!(joined.event, EVENT_ONLINE_USERS);
        assert_eq!(joined.data, serde_json::json!(["u1"]));

        let (_c2, mut rx2) = gateway.connect(Some("u2")).await;
        let mut after_join = gateway.online_users().await;
        after_join.sort();
        assert_eq!(after_join, ["u1", "u2"]);

        // Both clients saw the second join broadcast.
        let seen1 = next_event(&mut rx1).unwrap();
        let seen2 = next_event(&mut rx2).unwrap();
        assert_eq!(seen1.event, EVENT_ONLINE_USERS);
        assert_eq!(seen2.event, EVENT_ONLINE_USERS);

        gateway.disconnect(c1).await;
        assert_eq!(gateway.online_users().await, ["u2"]);
        let leave = next_event(&mut rx2).unwrap();
        assert_eq!(leave.event, EVENT_ONLINE_USERS);
        assert_eq!(leave.data, serde_json::json!(["u2"]));
    }

    #[tokio::test]
    async fn anonymous_connections_get_broadcasts_but_no_unicast() {
        let gateway = gateway();
        let (_anon, mut anon_rx) = gateway.connect(Some("undefined")).await;
        let (_c1, mut rx1) = gateway.connect(Some("u1")).await;
        while next_event(&mut rx1).is_ok() {}

        // The join broadcast reached the anonymous connection too.
        let seen = next_event(&mut anon_rx).unwrap();
        assert_eq!(seen.event, EVENT_ONLINE_USERS);
        assert_eq!(seen.data, serde_json::json!(["u1"]));

        // But "undefined" is not addressable.
        gateway
            .emit_to_user("undefined", EVENT_NEW_MESSAGE, serde_json::json!({}))
            .await;
        assert!(next_event(&mut anon_rx).is_err());
        assert_eq!(gateway.online_users().await, ["u1"]);
    }

    #[tokio::test]
    async fn disconnecting_an_anonymous_connection_broadcasts_nothing() {
        let gateway = gateway();
        let (anon, _anon_rx) = gateway.connect(None).await;
        let (_c1, mut rx1) = gateway.connect(Some("u1")).await;
        while next_event(&mut rx1).is_ok() {}

        gateway.disconnect(anon).await;
        assert!(next_event(&mut rx1).is_err());
    }
}
