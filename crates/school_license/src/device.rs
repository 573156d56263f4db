//! Machine identifier used for device slots
//!
//! The identifier is derived from the platform machine id rather than stored
//! raw, so the activation file never carries the OS identifier itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LicenseError, Result};

const DEVICE_DOMAIN: &[u8] = b"school-desk.device.v1:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Wrap an already-derived identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for the machine this process runs on
    pub fn current() -> Result<Self> {
        let raw = machine_uid::get()
            .map_err(|e| LicenseError::DeviceId(format!("Failed to get machine ID: {}", e)))?;
        Ok(Self::from_raw(&raw))
    }

    /// Derive an identifier from a raw platform id
    pub fn from_raw(raw: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DEVICE_DOMAIN);
        hasher.update(raw.trim().to_lowercase().as_bytes());
        let hash = hasher.finalize();
        Self(format!("{:x}", hash)[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
