//! Cross-process fan-out over PostgreSQL LISTEN/NOTIFY.
//!
//! Every server process shares one database.  Outgoing emits are published
//! as `pg_notify` payloads on a common channel; each process runs a
//! listener task that re-emits foreign-origin envelopes to its own local
//! connections.  A process's own notifications are recognized by the
//! `origin` id and skipped, since local delivery already happened.
//!
//! The adapter is an optimization layer: publish failures are logged and
//! swallowed, and a gateway constructed without an adapter simply runs in
//! single-process mode.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{RealtimeError, Result};
use crate::gateway::Gateway;

/// PostgreSQL rejects NOTIFY payloads close to the 8000-byte page limit.
/// Oversized events are dropped with a log line, never split.
const MAX_NOTIFY_PAYLOAD: usize = 7800;

/// Pause between listener reconnect attempts, so a database outage does
/// not turn the listener loop into a hot spin of failing acquisitions.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Addressing of a relayed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum Scope {
    /// Every connection on every process.
    All,
    /// The private channel of one user identity.
    User(String),
}

/// The JSON envelope carried in each notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Random id of the publishing process.
    pub origin: Uuid,
    #[serde(flatten)]
    pub scope: Scope,
    pub event: String,
    pub payload: Value,
}

/// Database-backed pub/sub relay shared by all gateway processes.
#[derive(Clone)]
pub struct FanoutAdapter {
    pool: PgPool,
    channel: String,
    origin: Uuid,
}

impl FanoutAdapter {
    /// Construct the adapter over an existing pool, probing the database so
    /// a dead connection surfaces here rather than on the first publish.
    ///
    /// Callers treat a failure as non-fatal: the gateway degrades to
    /// single-process presence and delivery.
    pub async fn connect(pool: PgPool, channel: &str) -> Result<Self> {
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self {
            pool,
            channel: channel.to_string(),
            origin: Uuid::new_v4(),
        })
    }

    /// Id identifying this process's own notifications.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Publish one event to every listening process (including this one;
    /// the listener filters by origin).
    pub async fn publish(&self, scope: Scope, event: &str, payload: &Value) -> Result<()> {
        let envelope = Envelope {
            origin: self.origin,
            scope,
            event: event.to_string(),
            payload: payload.clone(),
        };
        let body = serde_json::to_string(&envelope)?;

        if body.len() > MAX_NOTIFY_PAYLOAD {
            return Err(RealtimeError::PayloadTooLarge {
                size: body.len(),
                max: MAX_NOTIFY_PAYLOAD,
            });
        }

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Spawn the listener task that re-emits foreign-origin events to the
    /// gateway's local connections.  Runs until the process exits.
    pub fn spawn_listener(&self, gateway: Arc<Gateway>) -> tokio::task::JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.listen(gateway).await })
    }

    async fn listen(self, gateway: Arc<Gateway>) {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "fan-out listener could not connect; \
                       cross-process delivery disabled");
                return;
            }
        };
        if let Err(e) = listener.listen(&self.channel).await {
            error!(error = %e, channel = %self.channel,
                   "fan-out LISTEN failed; cross-process delivery disabled");
            return;
        }

        debug!(channel = %self.channel, origin = %self.origin, "fan-out listener running");

        loop {
            let notification = match listener.recv().await {
                Ok(notification) => notification,
                Err(e) => {
                    // PgListener re-establishes its connection on the next
                    // recv; events sent while disconnected are lost, which
                    // matches the best-effort delivery contract.
                    warn!(error = %e, "fan-out listener connection dropped");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let envelope: Envelope = match serde_json::from_str(notification.payload()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed fan-out envelope");
                    continue;
                }
            };

            if envelope.origin == self.origin {
                continue;
            }

            match envelope.scope {
                Scope::User(ref user_id) => {
                    gateway
                        .deliver_local(user_id, &envelope.event, envelope.payload.clone())
                        .await;
                }
                Scope::All => {
                    gateway
                        .broadcast_local(&envelope.event, envelope.payload.clone())
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip_unicast() {
        let envelope = Envelope {
            origin: Uuid::new_v4(),
            scope: Scope::User("u2".to_string()),
            event: "newMessage".to_string(),
            payload: serde_json::json!({ "body": "hello" }),
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_round_trip_broadcast() {
        let envelope = Envelope {
            origin: Uuid::new_v4(),
            scope: Scope::All,
            event: "getOnlineUsers".to_string(),
            payload: serde_json::json!(["u1"]),
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        assert!(encoded.contains("\"scope\":\"all\""));
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.scope, Scope::All);
    }
}
