//! Query helpers for [`Message`] and [`Attachment`] records.
//!
//! Messages are append-only.  A message and its attachments are inserted in
//! a single transaction so the send operation is all-or-nothing; history is
//! served in `(created_at, seq)` ascending order, which is stable for equal
//! timestamps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{
    normalize_body, Attachment, MediaKind, Message, MessageWithAttachments, NewAttachment,
};

impl Database {
    /// Append a message (and its attachments, atomically) to a conversation.
    ///
    /// The body is trimmed; empty or whitespace-only input is persisted as
    /// SQL `NULL`.  Returns the stored message in its wire shape, with the
    /// sender summary attached when the sender has a user record.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: &str,
        body: Option<&str>,
        attachments: &[NewAttachment],
    ) -> Result<MessageWithAttachments> {
        let body = normalize_body(body);
        let message_id = Uuid::new_v4();

        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, body)
             VALUES ($1, $2, $3, $4)
             RETURNING id, conversation_id, sender_id, body, seq, created_at",
        )
        .bind(message_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&body)
        .fetch_one(&mut *tx)
        .await?;
        let message = row_to_message(&row)?;

        let mut stored = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let row = sqlx::query(
                "INSERT INTO attachments
                     (id, message_id, kind, url, mime_type, file_name, file_size,
                      width, height, duration_secs, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 RETURNING id, message_id, kind, url, mime_type, file_name, file_size,
                           width, height, duration_secs, metadata",
            )
            .bind(Uuid::new_v4())
            .bind(message_id)
            .bind(attachment.kind.as_str())
            .bind(&attachment.url)
            .bind(&attachment.mime_type)
            .bind(&attachment.file_name)
            .bind(attachment.file_size)
            .bind(attachment.width)
            .bind(attachment.height)
            .bind(attachment.duration_secs)
            .bind(&attachment.metadata)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(row_to_attachment(&row)?);
        }

        tx.commit().await?;

        let sender = self.get_user_summary(sender_id).await?;

        Ok(MessageWithAttachments {
            message,
            attachments: stored,
            sender,
        })
    }

    /// List a conversation's messages in chronological order, each with its
    /// attachments and sender summary.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<MessageWithAttachments>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, body, seq, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(row_to_message(row)?);
        }

        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut attachments = self.attachments_for_messages(&ids).await?;
        let senders = self.summaries_for_senders(&messages).await?;

        Ok(messages
            .into_iter()
            .map(|message| {
                let attachments = attachments.remove(&message.id).unwrap_or_default();
                let sender = senders.get(&message.sender_id).cloned();
                MessageWithAttachments {
                    message,
                    attachments,
                    sender,
                }
            })
            .collect())
    }

    /// Fetch attachments for a batch of messages, grouped by message id.
    async fn attachments_for_messages(
        &self,
        message_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Attachment>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT id, message_id, kind, url, mime_type, file_name, file_size,
                    width, height, duration_secs, metadata
             FROM attachments
             WHERE message_id = ANY($1)
             ORDER BY id",
        )
        .bind(message_ids)
        .fetch_all(self.pool())
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for row in &rows {
            let attachment = row_to_attachment(row)?;
            grouped
                .entry(attachment.message_id)
                .or_default()
                .push(attachment);
        }
        Ok(grouped)
    }

    /// Fetch sender summaries for the distinct senders in a message batch.
    async fn summaries_for_senders(
        &self,
        messages: &[Message],
    ) -> Result<HashMap<String, crate::models::UserSummary>> {
        let mut sender_ids: Vec<String> = messages.iter().map(|m| m.sender_id.clone()).collect();
        sender_ids.sort();
        sender_ids.dedup();

        let mut summaries = HashMap::new();
        for sender_id in sender_ids {
            if let Some(summary) = self.get_user_summary(&sender_id).await? {
                summaries.insert(sender_id, summary);
            }
        }
        Ok(summaries)
    }
}

/// Map a row to a [`Message`].
fn row_to_message(row: &PgRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        seq: row.try_get("seq")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Map a row to an [`Attachment`].
fn row_to_attachment(row: &PgRow) -> Result<Attachment> {
    let kind: String = row.try_get("kind")?;

    Ok(Attachment {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        kind: MediaKind::from_column(&kind),
        url: row.try_get("url")?,
        mime_type: row.try_get("mime_type")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        duration_secs: row.try_get("duration_secs")?,
        metadata: row.try_get("metadata")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        Some(Database::connect(&url).await.expect("test db should open"))
    }

    fn unique_user(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4())
    }

    fn image_attachment() -> NewAttachment {
        NewAttachment {
            kind: MediaKind::Image,
            url: "/uploads/test.png".to_string(),
            mime_type: "image/png".to_string(),
            file_name: "test.png".to_string(),
            file_size: 1024,
            width: Some(64),
            height: Some(64),
            duration_secs: None,
            metadata: serde_json::json!({ "storage": "local" }),
        }
    }

    #[tokio::test]
    async fn messages_are_listed_in_insertion_order() {
        let Some(db) = test_db().await else { return };
        let (a, b) = (unique_user("a"), unique_user("b"));
        let conversation = db.find_or_create_conversation(&a, &b).await.unwrap();

        db.append_message(conversation.id, &a, Some("first"), &[])
            .await
            .unwrap();
        db.append_message(conversation.id, &b, Some("second"), &[])
            .await
            .unwrap();
        db.append_message(conversation.id, &a, Some("third"), &[])
            .await
            .unwrap();

        let history = db.list_messages(conversation.id).await.unwrap();
        let bodies: Vec<_> = history
            .iter()
            .map(|m| m.message.body.as_deref().unwrap())
            .collect();
        assert_eq!(bodies, ["first", "second", "third"]);

        // seq is strictly increasing, so equal timestamps cannot reorder.
        let seqs: Vec<_> = history.iter().map(|m| m.message.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn whitespace_only_body_is_stored_as_null() {
        let Some(db) = test_db().await else { return };
        let (a, b) = (unique_user("a"), unique_user("b"));
        let conversation = db.find_or_create_conversation(&a, &b).await.unwrap();

        let stored = db
            .append_message(conversation.id, &a, Some("   "), &[])
            .await
            .unwrap();
        assert_eq!(stored.message.body, None);

        let history = db.list_messages(conversation.id).await.unwrap();
        assert_eq!(history.last().unwrap().message.body, None);
    }

    #[tokio::test]
    async fn attachments_are_stored_with_the_message() {
        let Some(db) = test_db().await else { return };
        let (a, b) = (unique_user("a"), unique_user("b"));
        let conversation = db.find_or_create_conversation(&a, &b).await.unwrap();

        let stored = db
            .append_message(
                conversation.id,
                &a,
                Some("hello"),
                &[image_attachment()],
            )
            .await
            .unwrap();

        assert_eq!(stored.message.body.as_deref(), Some("hello"));
        assert_eq!(stored.attachments.len(), 1);
        assert_eq!(stored.attachments[0].kind, MediaKind::Image);
        assert_eq!(stored.attachments[0].message_id, stored.message.id);

        let history = db.list_messages(conversation.id).await.unwrap();
        assert_eq!(history.last().unwrap().attachments.len(), 1);
    }
}
