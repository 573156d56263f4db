use chrono::NaiveDate;
use thiserror::Error;

/// Licensing error type
///
/// Every variant is terminal for the check that produced it. The `Display`
/// text is what the user sees.
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("Invalid or tampered license")]
    InvalidSignature,

    #[error("Malformed license: {0}")]
    Malformed(String),

    #[error("License expired on {0}")]
    Expired(NaiveDate),

    #[error("Activation file has been tampered with")]
    Tampered,

    #[error("Activation file belongs to '{registry}', but this license is for '{license}'")]
    SchoolMismatch { registry: String, license: String },

    #[error("Device limit reached: this license allows {0} device(s)")]
    DeviceLimit(u32),

    #[error("Failed to get device identifier: {0}")]
    DeviceId(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LicenseError {
    fn from(err: std::io::Error) -> Self {
        LicenseError::Io(err.to_string())
    }
}

/// Result type alias using LicenseError
pub type Result<T> = std::result::Result<T, LicenseError>;
