//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `conversations`, `messages`,
//! and `attachments`.

use sqlx::{Executor, PgPool};

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (summary slice of the auth collaborator's accounts)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,            -- opaque identity from auth
    name       TEXT NOT NULL,
    image_url  TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            UUID PRIMARY KEY,
    participant_a TEXT NOT NULL,            -- as named by first contact
    participant_b TEXT NOT NULL,
    pair_key      TEXT NOT NULL UNIQUE,     -- canonical sorted "a:b"
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              UUID PRIMARY KEY,
    conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    sender_id       TEXT NOT NULL,
    body            TEXT,                   -- NULL for attachment-only messages
    seq             BIGSERIAL,              -- tie-break for equal timestamps
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_order
    ON messages(conversation_id, created_at ASC, seq ASC);

-- ----------------------------------------------------------------
-- Attachments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    id            UUID PRIMARY KEY,
    message_id    UUID NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    kind          TEXT NOT NULL,            -- IMAGE / VIDEO / AUDIO / FILE
    url           TEXT NOT NULL,
    mime_type     TEXT NOT NULL,
    file_name     TEXT NOT NULL,
    file_size     BIGINT NOT NULL,
    width         INTEGER,
    height        INTEGER,
    duration_secs DOUBLE PRECISION,
    metadata      JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE INDEX IF NOT EXISTS idx_attachments_message_id ON attachments(message_id);
"#;

/// Apply the initial migration.
pub async fn up(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(UP_SQL).await?;
    Ok(())
}
