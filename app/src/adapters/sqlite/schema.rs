use rusqlite::Connection;

use crate::error::DeskError;

pub fn initialize_schema(conn: &Connection) -> Result<(), DeskError> {
    conn.execute_batch("
        -- Conversations (one per thread or subject/participant pair)
        CREATE TABLE IF NOT EXISTS conversations (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            subject              TEXT,               -- subject of the first message
            subject_key          TEXT NOT NULL,      -- normalised subject (no Re:/Fwd:, lowercase)
            participant          TEXT NOT NULL,      -- normalised counterpart address
            unread_count         INTEGER NOT NULL DEFAULT 0,
            message_count        INTEGER NOT NULL DEFAULT 0,
            last_message_date    INTEGER,            -- unix epoch ms
            last_message_preview TEXT,
            created_at           INTEGER NOT NULL,
            updated_at           INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_match ON conversations(subject_key, participant);
        CREATE INDEX IF NOT EXISTS idx_conversations_date  ON conversations(last_message_date DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            message_id      TEXT NOT NULL,      -- RFC 5322 Message-ID, without angle brackets
            in_reply_to     TEXT,
            references_ids  TEXT NOT NULL DEFAULT '[]',  -- JSON array
            from_address    TEXT NOT NULL,
            from_name       TEXT,
            to_addresses    TEXT NOT NULL DEFAULT '[]',  -- JSON array
            subject         TEXT,
            body_text       TEXT,
            body_html       TEXT,
            sent_date       INTEGER NOT NULL,   -- unix epoch ms
            is_outgoing     INTEGER NOT NULL DEFAULT 0,
            is_read         INTEGER NOT NULL DEFAULT 0,
            has_attachments INTEGER NOT NULL DEFAULT 0,
            imap_uid        INTEGER,
            created_at      INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation     ON messages(conversation_id, sent_date);

        CREATE TABLE IF NOT EXISTS attachments (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            filename     TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size_bytes   INTEGER NOT NULL,
            data         BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
    ")?;

    Ok(())
}
