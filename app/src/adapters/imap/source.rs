use async_trait::async_trait;

use super::connection::ImapConnection;
use super::unseen;
use crate::error::DeskError;

/// Per-message operations the polling cycle needs from a mailbox
#[async_trait(?Send)]
pub trait MessageSource {
    /// Full RFC 822 bytes, leaving the message unseen
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, DeskError>;

    async fn mark_seen(&mut self, uid: u32) -> Result<(), DeskError>;
}

#[async_trait(?Send)]
impl MessageSource for ImapConnection {
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, DeskError> {
        unseen::fetch_raw(self, uid).await
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), DeskError> {
        unseen::mark_seen(self, uid).await
    }
}
