//! Unseen-message search, fetch and flagging for the polling cycle

use async_imap::types::Fetch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::debug;

use super::connection::ImapConnection;
use crate::error::DeskError;

/// IMAP date format for SEARCH: "18-Oct-2026"
pub fn imap_date(since: DateTime<Utc>) -> String {
    since.format("%d-%b-%Y").to_string()
}

/// UIDs of unseen messages since `since`, in ascending (server) order.
///
/// SINCE has day granularity, so the window is widened to the whole day.
pub async fn search_unseen_since(
    conn: &mut ImapConnection,
    folder: &str,
    since: DateTime<Utc>,
) -> Result<Vec<u32>, DeskError> {
    conn.select_folder(folder).await?;

    let query = format!("UNSEEN SINCE {}", imap_date(since));
    let uid_set = conn
        .session
        .uid_search(&query)
        .await
        .map_err(|e| DeskError::Backend(format!("SEARCH failed: {}", e)))?;

    let mut uids: Vec<u32> = uid_set.into_iter().collect();
    uids.sort_unstable();

    debug!(folder = %folder, query = %query, count = uids.len(), "Unseen search");
    Ok(uids)
}

/// Full RFC 822 message without setting \Seen
pub async fn fetch_raw(conn: &mut ImapConnection, uid: u32) -> Result<Vec<u8>, DeskError> {
    let fetches: Vec<Fetch> = conn
        .session
        .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
        .await
        .map_err(|e| DeskError::Backend(format!("FETCH {} failed: {}", uid, e)))?
        .try_collect()
        .await
        .map_err(|e| DeskError::Backend(format!("FETCH {} failed: {}", uid, e)))?;

    fetches
        .iter()
        .find_map(|fetch| fetch.body().map(|body| body.to_vec()))
        .ok_or_else(|| DeskError::Backend(format!("Message {} returned no body", uid)))
}

pub async fn mark_seen(conn: &mut ImapConnection, uid: u32) -> Result<(), DeskError> {
    let _updates: Vec<Fetch> = conn
        .session
        .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
        .await
        .map_err(|e| DeskError::Backend(format!("STORE {} failed: {}", uid, e)))?
        .try_collect()
        .await
        .map_err(|e| DeskError::Backend(format!("STORE {} failed: {}", uid, e)))?;
    Ok(())
}
