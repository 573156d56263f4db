//! Threading and storage of mail
//!
//! A message joins a conversation by, in order:
//! 1. its In-Reply-To pointing at a stored message
//! 2. the same normalised subject from the same normalised participant
//! 3. otherwise it starts a new conversation

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::sqlite::messages::{self, NewMessage};
use crate::adapters::sqlite::{attachments, conversations, DbPool};
use crate::error::DeskError;

use super::events::PREVIEW_CHARS;
use super::normalize::{normalize_email, normalize_subject, truncate_preview};
use super::parse::ParsedEmail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestedMessage {
    pub message_row_id: i64,
    pub conversation_id: i64,
    pub new_conversation: bool,
}

/// A message sent by the application itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Unix epoch ms
    pub sent_date: i64,
    pub in_reply_to: Option<String>,
}

fn resolve_conversation(
    conn: &Connection,
    in_reply_to: Option<&str>,
    subject: &str,
    participant: &str,
) -> Result<(i64, bool), DeskError> {
    if let Some(parent) = in_reply_to {
        if let Some(id) = conversations::find_by_message_id(conn, parent)? {
            debug!(conversation_id = id, parent = %parent, "Threaded by In-Reply-To");
            return Ok((id, false));
        }
    }

    let subject_key = normalize_subject(subject);
    if let Some(id) = conversations::find_by_subject(conn, &subject_key, participant)? {
        debug!(conversation_id = id, "Threaded by subject and participant");
        return Ok((id, false));
    }

    let subject = (!subject.trim().is_empty()).then_some(subject);
    let id = conversations::create(conn, subject, &subject_key, participant)?;
    Ok((id, true))
}

/// Store an incoming message with its attachments in one transaction.
///
/// Returns `None` when the Message-ID is already stored.
pub fn ingest_message(
    pool: &DbPool,
    email: &ParsedEmail,
    imap_uid: Option<u32>,
) -> Result<Option<IngestedMessage>, DeskError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;

    if messages::message_exists(&tx, &email.message_id)? {
        debug!(message_id = %email.message_id, "Message already stored, skipping");
        return Ok(None);
    }

    let participant = normalize_email(&email.from_address);
    let (conversation_id, new_conversation) = resolve_conversation(
        &tx,
        email.in_reply_to.as_deref(),
        &email.subject,
        &participant,
    )?;

    let message_row_id = messages::insert_message(
        &tx,
        &NewMessage {
            conversation_id,
            message_id: email.message_id.clone(),
            in_reply_to: email.in_reply_to.clone(),
            references_ids: email.references.clone(),
            from_address: email.from_address.clone(),
            from_name: email.from_name.clone(),
            to_addresses: email.to_addresses.clone(),
            subject: Some(email.subject.clone()).filter(|s| !s.is_empty()),
            body_text: email.body_text.clone(),
            body_html: email.body_html.clone(),
            sent_date: email.date,
            is_outgoing: false,
            is_read: false,
            has_attachments: !email.attachments.is_empty(),
            imap_uid,
        },
    )?;

    for attachment in &email.attachments {
        attachments::insert_attachment(
            &tx,
            message_row_id,
            &attachment.filename,
            &attachment.content_type,
            &attachment.data,
        )?;
    }

    conversations::record_message(
        &tx,
        conversation_id,
        email.date,
        &truncate_preview(email.preview_source(), PREVIEW_CHARS),
        true,
    )?;

    tx.commit()?;

    info!(
        message_id = %email.message_id,
        conversation_id,
        new_conversation,
        attachments = email.attachments.len(),
        "Stored incoming message"
    );

    Ok(Some(IngestedMessage {
        message_row_id,
        conversation_id,
        new_conversation,
    }))
}

/// Store a message the application sent so replies to it thread correctly.
///
/// The conversation participant is the first recipient.
pub fn record_outgoing(
    pool: &DbPool,
    outgoing: &OutgoingMessage,
) -> Result<Option<IngestedMessage>, DeskError> {
    let participant = outgoing
        .to
        .first()
        .map(|addr| normalize_email(addr))
        .ok_or_else(|| DeskError::Parse("Outgoing message has no recipient".to_string()))?;

    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;

    if messages::message_exists(&tx, &outgoing.message_id)? {
        return Ok(None);
    }

    let (conversation_id, new_conversation) = resolve_conversation(
        &tx,
        outgoing.in_reply_to.as_deref(),
        &outgoing.subject,
        &participant,
    )?;

    let message_row_id = messages::insert_message(
        &tx,
        &NewMessage {
            conversation_id,
            message_id: outgoing.message_id.clone(),
            in_reply_to: outgoing.in_reply_to.clone(),
            references_ids: outgoing.in_reply_to.iter().cloned().collect(),
            from_address: outgoing.from.clone(),
            from_name: None,
            to_addresses: outgoing.to.clone(),
            subject: Some(outgoing.subject.clone()).filter(|s| !s.is_empty()),
            body_text: Some(outgoing.body.clone()),
            body_html: None,
            sent_date: outgoing.sent_date,
            is_outgoing: true,
            is_read: true,
            has_attachments: false,
            imap_uid: None,
        },
    )?;

    let preview_source = if outgoing.body.trim().is_empty() {
        &outgoing.subject
    } else {
        &outgoing.body
    };
    conversations::record_message(
        &tx,
        conversation_id,
        outgoing.sent_date,
        &truncate_preview(preview_source, PREVIEW_CHARS),
        false,
    )?;

    tx.commit()?;

    debug!(message_id = %outgoing.message_id, conversation_id, "Recorded outgoing message");
    Ok(Some(IngestedMessage {
        message_row_id,
        conversation_id,
        new_conversation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;
    use crate::services::mail::parse::tests::raw_message;

    fn parsed(message_id: &str, from: &str, subject: &str, in_reply_to: Option<&str>) -> ParsedEmail {
        let raw = raw_message(message_id, from, subject, in_reply_to, "Body text");
        ParsedEmail::from_raw(&raw).unwrap()
    }

    #[test]
    fn test_new_message_starts_conversation() {
        let pool = pool::in_memory();
        let stored = ingest_message(
            &pool,
            &parsed("a1@parents.example", "mary@parents.example", "Student absence", None),
            Some(10),
        )
        .unwrap()
        .unwrap();

        assert!(stored.new_conversation);
        let conv = conversations::get_conversation(&pool, stored.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conv.subject.as_deref(), Some("Student absence"));
        assert_eq!(conv.participant, "mary@parents.example");
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.message_count, 1);
        assert_eq!(conv.last_message_preview.as_deref(), Some("Body text"));
    }

    #[test]
    fn test_reply_joins_parent_conversation() {
        let pool = pool::in_memory();
        let first = ingest_message(
            &pool,
            &parsed("a1@parents.example", "mary@parents.example", "Student absence", None),
            None,
        )
        .unwrap()
        .unwrap();

        // Different sender and subject, threaded purely by In-Reply-To
        let reply = ingest_message(
            &pool,
            &parsed("b2@parents.example", "dad@parents.example", "Thanks", Some("a1@parents.example")),
            None,
        )
        .unwrap()
        .unwrap();

        assert!(!reply.new_conversation);
        assert_eq!(reply.conversation_id, first.conversation_id);

        let conv = conversations::get_conversation(&pool, first.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conv.message_count, 2);
        assert_eq!(conv.unread_count, 2);
    }

    #[test]
    fn test_subject_and_sender_fallback() {
        let pool = pool::in_memory();
        let first = ingest_message(
            &pool,
            &parsed("a1@parents.example", "Mary@Parents.example", "Medication form", None),
            None,
        )
        .unwrap()
        .unwrap();

        let follow_up = ingest_message(
            &pool,
            &parsed("a2@parents.example", "mary@parents.example", "RE: medication  form", None),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(follow_up.conversation_id, first.conversation_id);

        let other_sender = ingest_message(
            &pool,
            &parsed("a3@parents.example", "john@parents.example", "Medication form", None),
            None,
        )
        .unwrap()
        .unwrap();
        assert_ne!(other_sender.conversation_id, first.conversation_id);
        assert!(other_sender.new_conversation);
    }

    #[test]
    fn test_duplicate_message_is_skipped() {
        let pool = pool::in_memory();
        let email = parsed("dup@parents.example", "mary@parents.example", "Student trip", None);

        assert!(ingest_message(&pool, &email, Some(1)).unwrap().is_some());
        assert!(ingest_message(&pool, &email, Some(1)).unwrap().is_none());

        let convs = conversations::list_conversations(&pool, 10).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].message_count, 1);
    }

    #[test]
    fn test_attachments_are_stored() {
        let pool = pool::in_memory();
        let raw = concat!(
            "From: nurse@northfield.edu\r\n",
            "Subject: Medication log\r\n",
            "Message-ID: <att@northfield.edu>\r\n",
            "Content-Type: multipart/mixed; boundary=\"B\"\r\n",
            "\r\n",
            "--B\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "See attached.\r\n",
            "--B\r\n",
            "Content-Type: text/csv; name=\"log.csv\"\r\n",
            "Content-Disposition: attachment; filename=\"log.csv\"\r\n",
            "\r\n",
            "time,dose\r\n",
            "--B--\r\n",
        );
        let email = ParsedEmail::from_raw(raw.as_bytes()).unwrap();
        let stored = ingest_message(&pool, &email, None).unwrap().unwrap();

        let listed = attachments::list_attachments(&pool, stored.message_row_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "log.csv");
        assert_eq!(listed[0].content_type, "text/csv");

        let data = attachments::get_attachment_data(&pool, listed[0].id)
            .unwrap()
            .unwrap();
        assert_eq!(data.len() as i64, listed[0].size_bytes);

        let msgs = messages::get_conversation_messages(&pool, stored.conversation_id).unwrap();
        assert!(msgs[0].has_attachments);
    }

    #[test]
    fn test_mark_conversation_read() {
        let pool = pool::in_memory();
        let stored = ingest_message(
            &pool,
            &parsed("a1@parents.example", "mary@parents.example", "Student absence", None),
            None,
        )
        .unwrap()
        .unwrap();

        let changed = conversations::mark_conversation_read(&pool, stored.conversation_id).unwrap();
        assert_eq!(changed, 1);

        let conv = conversations::get_conversation(&pool, stored.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conv.unread_count, 0);
        let msgs = messages::get_conversation_messages(&pool, stored.conversation_id).unwrap();
        assert!(msgs.iter().all(|m| m.is_read));

        assert!(matches!(
            conversations::mark_conversation_read(&pool, 999),
            Err(DeskError::NotFound(_))
        ));
    }

    #[test]
    fn test_reply_to_outgoing_message() {
        let pool = pool::in_memory();
        let sent = record_outgoing(
            &pool,
            &OutgoingMessage {
                message_id: "out1@northfield.edu".to_string(),
                from: "office@northfield.edu".to_string(),
                to: vec!["Mary@parents.example".to_string()],
                subject: "Trip consent".to_string(),
                body: "Please sign the form.".to_string(),
                sent_date: 1_000,
                in_reply_to: None,
            },
        )
        .unwrap()
        .unwrap();

        let conv = conversations::get_conversation(&pool, sent.conversation_id)
            .unwrap()
            .unwrap();
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.participant, "mary@parents.example");
        assert!(messages::is_tracked(&pool, "out1@northfield.edu").unwrap());

        let reply = ingest_message(
            &pool,
            &parsed("r1@parents.example", "mary@parents.example", "Re: Trip consent", Some("out1@northfield.edu")),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(reply.conversation_id, sent.conversation_id);

        let msgs = messages::get_conversation_messages(&pool, sent.conversation_id).unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_outgoing);
        assert!(!msgs[1].is_outgoing);
    }

    #[test]
    fn test_outgoing_without_recipient() {
        let pool = pool::in_memory();
        let result = record_outgoing(
            &pool,
            &OutgoingMessage {
                message_id: "out2@northfield.edu".to_string(),
                from: "office@northfield.edu".to_string(),
                to: vec![],
                subject: "Nobody".to_string(),
                body: String::new(),
                sent_date: 0,
                in_reply_to: None,
            },
        );
        assert!(matches!(result, Err(DeskError::Parse(_))));
    }
}
