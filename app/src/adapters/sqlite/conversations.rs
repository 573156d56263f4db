use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DbPool;
use crate::error::DeskError;

/// Conversation row as shown in the conversation list
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub subject: Option<String>,
    pub participant: String,
    pub unread_count: u32,
    pub message_count: u32,
    pub last_message_date: Option<i64>,
    pub last_message_preview: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

const CONVERSATION_COLUMNS: &str = "id, subject, participant, unread_count, message_count,
     last_message_date, last_message_preview, created_at, updated_at";

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        subject: row.get(1)?,
        participant: row.get(2)?,
        unread_count: row.get(3)?,
        message_count: row.get(4)?,
        last_message_date: row.get(5)?,
        last_message_preview: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Conversation holding the stored message with this Message-ID
pub fn find_by_message_id(conn: &Connection, message_id: &str) -> Result<Option<i64>, DeskError> {
    let id = conn
        .query_row(
            "SELECT conversation_id FROM messages WHERE message_id = ?1",
            params![message_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Most recent conversation with this normalised subject and participant
pub fn find_by_subject(
    conn: &Connection,
    subject_key: &str,
    participant: &str,
) -> Result<Option<i64>, DeskError> {
    let id = conn
        .query_row(
            "SELECT id FROM conversations
             WHERE subject_key = ?1 AND participant = ?2
             ORDER BY last_message_date DESC
             LIMIT 1",
            params![subject_key, participant],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn create(
    conn: &Connection,
    subject: Option<&str>,
    subject_key: &str,
    participant: &str,
) -> Result<i64, DeskError> {
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO conversations (subject, subject_key, participant, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![subject, subject_key, participant, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fold one new message into the conversation counters.
///
/// The preview only moves forward in time; an older message arriving late
/// does not replace it.
pub fn record_message(
    conn: &Connection,
    conversation_id: i64,
    sent_date: i64,
    preview: &str,
    unread: bool,
) -> Result<(), DeskError> {
    conn.execute(
        "UPDATE conversations SET
            message_count = message_count + 1,
            unread_count = unread_count + ?2,
            last_message_preview = CASE
                WHEN last_message_date IS NULL OR ?3 >= last_message_date THEN ?4
                ELSE last_message_preview END,
            last_message_date = MAX(COALESCE(last_message_date, ?3), ?3),
            updated_at = ?5
         WHERE id = ?1",
        params![
            conversation_id,
            unread as i32,
            sent_date,
            preview,
            chrono::Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn list_conversations(pool: &DbPool, limit: u32) -> Result<Vec<Conversation>, DeskError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         ORDER BY last_message_date DESC
         LIMIT ?1"
    ))?;

    let rows = stmt.query_map(params![limit], row_to_conversation)?;

    let mut conversations = Vec::new();
    for row in rows {
        conversations.push(row?);
    }
    Ok(conversations)
}

pub fn get_conversation(pool: &DbPool, id: i64) -> Result<Option<Conversation>, DeskError> {
    let conn = pool.get()?;
    let conversation = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )
        .optional()?;
    Ok(conversation)
}

/// Mark every message in a conversation read and clear its unread count.
/// Returns the number of messages that changed.
pub fn mark_conversation_read(pool: &DbPool, id: i64) -> Result<usize, DeskError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;

    let changed = tx.execute(
        "UPDATE messages SET is_read = 1 WHERE conversation_id = ?1 AND is_read = 0",
        params![id],
    )?;
    let found = tx.execute(
        "UPDATE conversations SET unread_count = 0, updated_at = ?2 WHERE id = ?1",
        params![id, chrono::Utc::now().timestamp_millis()],
    )?;

    if found == 0 {
        return Err(DeskError::NotFound(format!("conversation {}", id)));
    }

    tx.commit()?;
    Ok(changed)
}
