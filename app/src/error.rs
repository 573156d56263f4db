//! Application error type
//!
//! Errors cross into the GUI layer as plain strings, so `Serialize` writes
//! the display text.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("License error: {0}")]
    License(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Serialize for DeskError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<r2d2::Error> for DeskError {
    fn from(e: r2d2::Error) -> Self {
        DeskError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for DeskError {
    fn from(e: rusqlite::Error) -> Self {
        DeskError::Database(e.to_string())
    }
}

impl From<std::io::Error> for DeskError {
    fn from(e: std::io::Error) -> Self {
        DeskError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DeskError {
    fn from(e: serde_json::Error) -> Self {
        DeskError::Parse(e.to_string())
    }
}

impl From<mailparse::MailParseError> for DeskError {
    fn from(e: mailparse::MailParseError) -> Self {
        DeskError::Parse(e.to_string())
    }
}

/// Result type alias using DeskError
pub type Result<T> = std::result::Result<T, DeskError>;
