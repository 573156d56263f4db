use flume::Sender;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ingest::IngestedMessage;
use super::normalize::truncate_preview;
use super::parse::ParsedEmail;

pub const PREVIEW_CHARS: usize = 100;

/// Event emitted by the mailbox poller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailEvent {
    NewMessage {
        conversation_id: i64,
        message_id: String,
        from: String,
        subject: String,
        preview: String,
        new_conversation: bool,
    },
    CycleFailed {
        error: String,
    },
}

impl MailEvent {
    pub fn new_message(email: &ParsedEmail, stored: &IngestedMessage) -> Self {
        MailEvent::NewMessage {
            conversation_id: stored.conversation_id,
            message_id: email.message_id.clone(),
            from: email
                .from_name
                .clone()
                .unwrap_or_else(|| email.from_address.clone()),
            subject: email.subject.clone(),
            preview: truncate_preview(email.preview_source(), PREVIEW_CHARS),
            new_conversation: stored.new_conversation,
        }
    }
}

/// Fire-and-forget; nobody listening is not an error
pub fn emit(events: &Sender<MailEvent>, event: MailEvent) {
    if events.send(event).is_err() {
        debug!("No listener for mail events");
    }
}
