use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::DeskError;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub license: LicenseConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Mailbox polling; absent means polling stays off
    pub mailbox: Option<MailboxConfig>,
}

/// Where the license and the activation registry live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default = "default_license_file")]
    pub license_file: PathBuf,

    #[serde(default = "default_activation_file")]
    pub activation_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// IMAP mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// IMAP server hostname
    #[serde(default)]
    pub host: String,

    /// IMAP server port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_folder")]
    pub folder: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Only unseen messages newer than this are searched
    #[serde(default = "default_search_window")]
    pub search_window_hours: i64,

    /// Subject keywords that make a message relevant
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// How long `stop()` waits for the worker before giving up
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
}

impl MailboxConfig {
    pub fn has_credentials(&self) -> bool {
        !self.host.trim().is_empty() && !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_search_window() -> i64 {
    24
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_keywords() -> Vec<String> {
    [
        "student",
        "teacher",
        "department",
        "health",
        "medication",
        "school",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_license_file() -> PathBuf {
    data_dir().join("license.json")
}

fn default_activation_file() -> PathBuf {
    data_dir().join("activation.json")
}

fn default_database_path() -> PathBuf {
    data_dir().join("school-desk.db")
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            license_file: default_license_file(),
            activation_file: default_activation_file(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Application data directory
///
/// Debug builds keep everything next to the working directory.
pub fn data_dir() -> PathBuf {
    if cfg!(debug_assertions) {
        return PathBuf::from(".school-desk");
    }

    dirs::data_local_dir()
        .map(|dir| dir.join("school-desk"))
        .unwrap_or_else(|| PathBuf::from(".school-desk"))
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("school-desk").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".school-desk.toml"));
    }

    paths
}

/// Load configuration from the first default path that exists
pub fn load() -> Result<AppConfig, DeskError> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

/// Load configuration from a specific path
pub fn load_from_path(path: &Path) -> Result<AppConfig, DeskError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| DeskError::Config(format!("Failed to read config: {}", e)))?;

    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig, DeskError> {
    toml::from_str(content).map_err(|e| DeskError::Config(format!("Failed to parse config: {}", e)))
}
