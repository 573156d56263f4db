use rusqlite::{params, Connection};
use serde::Serialize;

use super::DbPool;
use crate::error::DeskError;

/// A message ready to be stored.
/// This is decoupled from IMAP; outgoing mail produces it too.
pub struct NewMessage {
    pub conversation_id: i64,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references_ids: Vec<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sent_date: i64,
    pub is_outgoing: bool,
    pub is_read: bool,
    pub has_attachments: bool,
    pub imap_uid: Option<u32>,
}

/// Stored message as shown in a conversation view
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sent_date: i64,
    pub is_outgoing: bool,
    pub is_read: bool,
    pub has_attachments: bool,
}

pub fn insert_message(conn: &Connection, msg: &NewMessage) -> Result<i64, DeskError> {
    conn.execute(
        "INSERT INTO messages (
            conversation_id, message_id, in_reply_to, references_ids, from_address,
            from_name, to_addresses, subject, body_text, body_html,
            sent_date, is_outgoing, is_read, has_attachments, imap_uid,
            created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15,
            ?16
        )",
        params![
            msg.conversation_id,
            msg.message_id,
            msg.in_reply_to,
            serde_json::to_string(&msg.references_ids)?,
            msg.from_address,
            msg.from_name,
            serde_json::to_string(&msg.to_addresses)?,
            msg.subject,
            msg.body_text,
            msg.body_html,
            msg.sent_date,
            msg.is_outgoing as i32,
            msg.is_read as i32,
            msg.has_attachments as i32,
            msg.imap_uid,
            chrono::Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn message_exists(conn: &Connection, message_id: &str) -> Result<bool, DeskError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?1)",
        params![message_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Whether a Message-ID belongs to a message we already hold
pub fn is_tracked(pool: &DbPool, message_id: &str) -> Result<bool, DeskError> {
    let conn = pool.get()?;
    message_exists(&conn, message_id)
}

pub fn get_conversation_messages(
    pool: &DbPool,
    conversation_id: i64,
) -> Result<Vec<StoredMessage>, DeskError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, message_id, in_reply_to, from_address,
                from_name, to_addresses, subject, body_text, body_html,
                sent_date, is_outgoing, is_read, has_attachments
         FROM messages WHERE conversation_id = ?1
         ORDER BY sent_date ASC, id ASC",
    )?;

    let rows = stmt.query_map(params![conversation_id], |row| {
        let to_json: String = row.get(6)?;
        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            message_id: row.get(2)?,
            in_reply_to: row.get(3)?,
            from_address: row.get(4)?,
            from_name: row.get(5)?,
            to_addresses: serde_json::from_str(&to_json).unwrap_or_default(),
            subject: row.get(7)?,
            body_text: row.get(8)?,
            body_html: row.get(9)?,
            sent_date: row.get(10)?,
            is_outgoing: row.get::<_, i32>(11)? != 0,
            is_read: row.get::<_, i32>(12)? != 0,
            has_attachments: row.get::<_, i32>(13)? != 0,
        })
    })?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}
