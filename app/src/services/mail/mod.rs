//! Mailbox ingestion
//!
//! Relevant incoming mail is parsed, threaded into conversations and stored;
//! the GUI layer hears about it through `MailEvent`s.

pub mod events;
pub mod ingest;
pub mod normalize;
pub mod parse;
pub mod poller;
pub mod relevance;

pub use events::MailEvent;
pub use ingest::{ingest_message, record_outgoing, IngestedMessage, OutgoingMessage};
pub use parse::{ParsedAttachment, ParsedEmail};
pub use poller::{MailboxPoller, PollerState};
pub use relevance::{Relevance, RelevanceFilter};
