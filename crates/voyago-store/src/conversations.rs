//! Query helpers for [`Conversation`] records.
//!
//! A conversation is created lazily on the first message between a pair of
//! users.  The unique index on the canonical `pair_key` guarantees at most
//! one conversation per unordered participant pair: two racing first-contact
//! sends both land on the same row via `ON CONFLICT DO NOTHING` plus
//! re-select.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{pair_key, Conversation};

impl Database {
    /// Find the conversation between two participants, if one exists.
    pub async fn find_conversation_by_participants(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, participant_a, participant_b, created_at
             FROM conversations
             WHERE pair_key = $1",
        )
        .bind(pair_key(a, b))
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_conversation(&r)).transpose()
    }

    /// Insert a new conversation between two participants.
    ///
    /// Fails with a unique-constraint violation if one already exists for
    /// the pair; callers that want lazy creation should use
    /// [`Database::find_or_create_conversation`] instead.
    pub async fn create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO conversations (id, participant_a, participant_b, pair_key)
             VALUES ($1, $2, $3, $4)
             RETURNING id, participant_a, participant_b, created_at",
        )
        .bind(id)
        .bind(a)
        .bind(b)
        .bind(pair_key(a, b))
        .fetch_one(self.pool())
        .await?;

        row_to_conversation(&row)
    }

    /// Return the conversation for the pair, creating it if absent.
    ///
    /// Safe under concurrent first contact: the losing insert is a no-op
    /// and both callers re-select the single surviving row.
    pub async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        if let Some(existing) = self.find_conversation_by_participants(a, b).await? {
            return Ok(existing);
        }

        sqlx::query(
            "INSERT INTO conversations (id, participant_a, participant_b, pair_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (pair_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(a)
        .bind(b)
        .bind(pair_key(a, b))
        .execute(self.pool())
        .await?;

        self.find_conversation_by_participants(a, b)
            .await?
            .ok_or(StoreError::NotFound)
    }
}

/// Map a row to a [`Conversation`].
fn row_to_conversation(row: &PgRow) -> Result<Conversation> {
    let id: Uuid = row.try_get("id")?;
    let participant_a: String = row.try_get("participant_a")?;
    let participant_b: String = row.try_get("participant_b")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Conversation {
        id,
        participant_ids: vec![participant_a, participant_b],
        created_at,
    })
}
