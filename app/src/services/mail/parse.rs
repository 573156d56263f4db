//! MIME parsing of fetched messages
//!
//! Headers come back decoded (RFC 2047), bodies decoded from their transfer
//! encoding and charset. Parts with an attachment disposition or a file name,
//! and inline non-text parts, are kept as binary attachments.

use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use uuid::Uuid;

use super::normalize::message_ids;
use crate::error::DeskError;

#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl ParsedAttachment {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Without angle brackets; synthesised when the header is missing
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Unix epoch ms; arrival time when the Date header is missing or broken
    pub date: i64,
    pub attachments: Vec<ParsedAttachment>,
}

impl ParsedEmail {
    pub fn from_raw(raw: &[u8]) -> Result<Self, DeskError> {
        let mail = mailparse::parse_mail(raw)?;
        let headers = &mail.headers;

        let (from_address, from_name) = headers
            .get_first_value("From")
            .and_then(|value| parse_addresses(&value).into_iter().next())
            .ok_or_else(|| DeskError::Parse("Message has no From address".to_string()))?;

        let to_addresses = headers
            .get_all_values("To")
            .iter()
            .flat_map(|value| parse_addresses(value))
            .map(|(addr, _)| addr)
            .collect();

        let message_id = headers
            .get_first_value("Message-ID")
            .and_then(|value| message_ids(&value).into_iter().next())
            .unwrap_or_else(|| format!("{}@school-desk.local", Uuid::new_v4()));

        let in_reply_to = headers
            .get_first_value("In-Reply-To")
            .and_then(|value| message_ids(&value).into_iter().next());

        let references = headers
            .get_first_value("References")
            .map(|value| message_ids(&value))
            .unwrap_or_default();

        let date = headers
            .get_first_value("Date")
            .and_then(|value| mailparse::dateparse(&value).ok())
            .map(|secs| secs * 1000)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let mut email = Self {
            message_id,
            in_reply_to,
            references,
            from_address,
            from_name,
            to_addresses,
            subject: headers
                .get_first_value("Subject")
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            body_text: None,
            body_html: None,
            date,
            attachments: Vec::new(),
        };

        email.collect_parts(&mail)?;
        Ok(email)
    }

    /// Text shown in notifications and the conversation list
    pub fn preview_source(&self) -> &str {
        self.body_text
            .as_deref()
            .filter(|body| !body.trim().is_empty())
            .unwrap_or(&self.subject)
    }

    fn collect_parts(&mut self, part: &ParsedMail) -> Result<(), DeskError> {
        if !part.subparts.is_empty() {
            for sub in &part.subparts {
                self.collect_parts(sub)?;
            }
            return Ok(());
        }

        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();
        let mimetype = part.ctype.mimetype.to_lowercase();

        let attached = disposition.disposition == DispositionType::Attachment || filename.is_some();

        if !attached && mimetype == "text/plain" && self.body_text.is_none() {
            self.body_text = Some(part.get_body()?);
        } else if !attached && mimetype == "text/html" && self.body_html.is_none() {
            self.body_html = Some(part.get_body()?);
        } else if attached || !mimetype.starts_with("text/") {
            // Inline images and other binary parts are kept too
            self.attachments.push(ParsedAttachment {
                filename: filename.unwrap_or_else(|| "attachment".to_string()),
                content_type: mimetype,
                data: part.get_body_raw()?,
            });
        }

        Ok(())
    }
}

/// (address, display name) pairs; group syntax is flattened
fn parse_addresses(value: &str) -> Vec<(String, Option<String>)> {
    let Ok(list) = mailparse::addrparse(value) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push((info.addr.clone(), info.display_name.clone())),
            MailAddr::Group(group) => out.extend(
                group
                    .addrs
                    .iter()
                    .map(|info| (info.addr.clone(), info.display_name.clone())),
            ),
        }
    }
    out
}
