//! Domain model structs persisted in the shared PostgreSQL database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be returned
//! directly from the HTTP handlers and carried as a realtime event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User summary
// ---------------------------------------------------------------------------

/// The slice of a user record this subsystem cares about: enough to render
/// the conversation sidebar and the sender line of a delivered message.
/// Accounts themselves are owned by the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    /// Opaque user identifier established by authentication.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional avatar URL.
    pub image_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party message thread, created lazily on first contact and never
/// deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: Uuid,
    /// The two participant identities, in the order first contact named them.
    pub participant_ids: Vec<String>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
}

/// Canonical key for an unordered participant pair.  A unique index on this
/// key is what guarantees at most one conversation per pair, even when two
/// first-contact sends race each other.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  Immutable after creation: there is no edit or
/// delete operation in this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// The conversation this message belongs to.
    pub conversation_id: Uuid,
    /// Identity of the sender.
    pub sender_id: String,
    /// Text body.  `None` when the message carries only attachments; an
    /// empty or whitespace-only submission is normalized to `None`, never
    /// stored as an empty string.
    pub body: Option<String>,
    /// Insertion counter, the stable tie-break for equal timestamps.
    pub seq: i64,
    /// When the message was persisted.  History ordering is
    /// `(created_at, seq)` ascending.
    pub created_at: DateTime<Utc>,
}

/// Trim a submitted message body, mapping empty and whitespace-only input
/// to `None`.
pub fn normalize_body(body: Option<&str>) -> Option<String> {
    match body {
        Some(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Broad media classification of an attachment, derived from its mime type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    /// Classify from a mime type prefix; anything unrecognized is a
    /// generic file.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::File
        }
    }

    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
            MediaKind::Audio => "AUDIO",
            MediaKind::File => "FILE",
        }
    }

    /// Parse the column representation, defaulting unknown values to `File`.
    pub fn from_column(value: &str) -> Self {
        match value {
            "IMAGE" => MediaKind::Image,
            "VIDEO" => MediaKind::Video,
            "AUDIO" => MediaKind::Audio,
            _ => MediaKind::File,
        }
    }
}

/// A media or file object belonging to exactly one message.  Created
/// atomically with its parent message and never independently mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: Uuid,
    /// The message this attachment belongs to.
    pub message_id: Uuid,
    /// Broad media classification.
    pub kind: MediaKind,
    /// Storage URL the client fetches the bytes from.
    pub url: String,
    /// Mime type as reported at upload time.
    pub mime_type: String,
    /// Original file name.
    pub file_name: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Pixel width, for images and video.
    pub width: Option<i32>,
    /// Pixel height, for images and video.
    pub height: Option<i32>,
    /// Duration in seconds, for audio and video.
    pub duration_secs: Option<f64>,
    /// Provider-specific metadata bag.
    pub metadata: serde_json::Value,
}

/// Input for an attachment created together with a new message.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub kind: MediaKind,
    pub url: String,
    pub mime_type: String,
    pub file_name: String,
    pub file_size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// The shape served as message history and delivered as the `newMessage`
/// event payload: the message, its attachments, and a sender summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageWithAttachments {
    #[serde(flatten)]
    pub message: Message,
    pub attachments: Vec<Attachment>,
    /// Sender summary, when the sender has a known user record.
    pub sender: Option<UserSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key("u1", "u2"), pair_key("u2", "u1"));
        assert_eq!(pair_key("u1", "u2"), "u1:u2");
    }

    #[test]
    fn normalize_body_maps_blank_to_none() {
        assert_eq!(normalize_body(None), None);
        assert_eq!(normalize_body(Some("")), None);
        assert_eq!(normalize_body(Some("   \t\n")), None);
        assert_eq!(normalize_body(Some("  hello  ")), Some("hello".to_string()));
    }

    #[test]
    fn media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("IMAGE/JPEG"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::File);
        assert_eq!(MediaKind::from_mime(""), MediaKind::File);
    }

    #[test]
    fn media_kind_column_round_trip() {
        for kind in [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::File,
        ] {
            assert_eq!(MediaKind::from_column(kind.as_str()), kind);
        }
        assert_eq!(MediaKind::from_column("???"), MediaKind::File);
    }
}
