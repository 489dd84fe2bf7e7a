//! Named events delivered over the realtime connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A newly persisted message, unicast to the recipient's private channel.
/// Payload: the message with its attachments and sender summary.
pub const EVENT_NEW_MESSAGE: &str = "newMessage";

/// The full list of identities currently connected to this process,
/// broadcast to every client after each join and leave.
pub const EVENT_ONLINE_USERS: &str = "getOnlineUsers";

/// Handshake identity value treated the same as an absent one: a client
/// whose stored user id was never populated sends the literal string.
pub const PLACEHOLDER_IDENTITY: &str = "undefined";

/// An event on its way to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEvent {
    /// Event name, e.g. [`EVENT_NEW_MESSAGE`].
    pub event: String,
    /// JSON payload.
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Serialize to the text frame sent over the socket.
    pub fn to_frame(&self) -> String {
        // OutboundEvent has no non-serializable fields, so this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Whether a handshake-supplied identity can be registered for presence.
/// Absent, empty, and the placeholder literal are all unaddressable.
pub fn is_addressable(identity: &str) -> bool {
    !identity.is_empty() && identity != PLACEHOLDER_IDENTITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape() {
        let event = OutboundEvent::new(EVENT_ONLINE_USERS, serde_json::json!(["u1", "u2"]));
        let frame: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(frame["event"], "getOnlineUsers");
        assert_eq!(frame["data"][0], "u1");
    }

    #[test]
    fn addressability() {
        assert!(is_addressable("u1"));
        assert!(!is_addressable(""));
        assert!(!is_addressable("undefined"));
    }
}
