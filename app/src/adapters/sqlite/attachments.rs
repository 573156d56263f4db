use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::DbPool;
use crate::error::DeskError;

/// Attachment metadata (the payload is fetched separately)
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentInfo {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

pub fn insert_attachment(
    conn: &Connection,
    message_row_id: i64,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Result<i64, DeskError> {
    conn.execute(
        "INSERT INTO attachments (message_id, filename, content_type, size_bytes, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![message_row_id, filename, content_type, data.len() as i64, data],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_attachments(pool: &DbPool, message_row_id: i64) -> Result<Vec<AttachmentInfo>, DeskError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, message_id, filename, content_type, size_bytes
         FROM attachments WHERE message_id = ?1 ORDER BY id",
    )?;

    let rows = stmt.query_map(params![message_row_id], |row| {
        Ok(AttachmentInfo {
            id: row.get(0)?,
            message_id: row.get(1)?,
            filename: row.get(2)?,
            content_type: row.get(3)?,
            size_bytes: row.get(4)?,
        })
    })?;

    let mut attachments = Vec::new();
    for row in rows {
        attachments.push(row?);
    }
    Ok(attachments)
}

pub fn get_attachment_data(pool: &DbPool, attachment_id: i64) -> Result<Option<Vec<u8>>, DeskError> {
    let conn = pool.get()?;
    let data = conn
        .query_row(
            "SELECT data FROM attachments WHERE id = ?1",
            params![attachment_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(data)
}
