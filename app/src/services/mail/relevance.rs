use crate::adapters::sqlite::{messages, DbPool};
use crate::error::DeskError;

use super::parse::ParsedEmail;

/// Why a message was accepted (or not)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    /// Reply to a message already in a conversation
    Reply,
    /// Subject contains this keyword
    Keyword(String),
    Irrelevant,
}

impl Relevance {
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Relevance::Irrelevant)
    }
}

/// Decides which incoming mail belongs in the desk.
///
/// Keywords match case-insensitively anywhere in the subject.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn new(keywords: &[String]) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Pure classification; `reply_tracked` says whether In-Reply-To points
    /// at a stored message.
    pub fn classify(&self, email: &ParsedEmail, reply_tracked: bool) -> Relevance {
        if email.in_reply_to.is_some() && reply_tracked {
            return Relevance::Reply;
        }

        let subject = email.subject.to_lowercase();
        match self.keywords.iter().find(|k| subject.contains(k.as_str())) {
            Some(keyword) => Relevance::Keyword(keyword.clone()),
            None => Relevance::Irrelevant,
        }
    }

    pub fn evaluate(&self, pool: &DbPool, email: &ParsedEmail) -> Result<Relevance, DeskError> {
        let reply_tracked = match &email.in_reply_to {
            Some(parent) => messages::is_tracked(pool, parent)?,
            None => false,
        };
        Ok(self.classify(email, reply_tracked))
    }
}
