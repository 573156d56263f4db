//! Local activation registry
//!
//! Records which machines consumed a license's device slots. The file is
//! compact JSON:
//!
//! ```json
//! {"school":"...","devices":["..."],"hmac":"<hex>"}
//! ```
//!
//! The tag is HMAC-SHA256 over the canonical JSON of `{school, devices}`.
//! A load only succeeds when the file is byte-for-byte the canonical
//! serialisation of what it claims, so any edit to the file is reported as
//! tampering.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::device::MachineId;
use crate::error::{LicenseError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Embedded registry key. Tamper evidence only: it ships inside the client.
const REGISTRY_SECRET: &[u8] = b"school-desk.activation.registry.v1";

/// On-disk form
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    school: String,
    devices: Vec<String>,
    hmac: String,
}

/// The fields covered by the tag
#[derive(Serialize)]
struct TaggedFields<'a> {
    school: &'a str,
    devices: &'a BTreeSet<String>,
}

/// Outcome of registering the current machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Machine was already registered, nothing changed
    AlreadyActive,
    /// Machine took a free slot; the registry must be saved
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRegistry {
    school: String,
    devices: BTreeSet<String>,
}

impl ActivationRegistry {
    pub fn empty(school: &str) -> Self {
        Self {
            school: school.to_string(),
            devices: BTreeSet::new(),
        }
    }

    pub fn school(&self) -> &str {
        &self.school
    }

    pub fn devices(&self) -> Vec<String> {
        self.devices.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device: &MachineId) -> bool {
        self.devices.contains(device.as_str())
    }

    /// Load the registry, or start an empty one scoped to `school` when the
    /// file does not exist yet.
    pub fn load_or_init(path: &Path, school: &str) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => {
                let registry = Self::from_bytes(&bytes)?;
                debug!(
                    path = %path.display(),
                    devices = registry.len(),
                    "Loaded activation registry"
                );
                Ok(registry)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No activation registry yet, starting empty");
                Ok(Self::empty(school))
            }
            Err(e) => Err(LicenseError::Io(format!(
                "Failed to read activation file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Parse and authenticate a persisted registry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: RegistryFile = serde_json::from_slice(bytes).map_err(|e| {
            warn!("Activation file does not parse: {}", e);
            LicenseError::Tampered
        })?;

        let devices: BTreeSet<String> = file.devices.iter().cloned().collect();
        if devices.len() != file.devices.len() {
            warn!("Activation file lists a device twice");
            return Err(LicenseError::Tampered);
        }

        let registry = Self {
            school: file.school,
            devices,
        };

        let stored_tag = hex::decode(&file.hmac).map_err(|_| LicenseError::Tampered)?;
        registry
            .mac()?
            .verify_slice(&stored_tag)
            .map_err(|_| {
                warn!("Activation file HMAC mismatch");
                LicenseError::Tampered
            })?;

        if registry.to_bytes()? != bytes {
            warn!("Activation file is not in canonical form");
            return Err(LicenseError::Tampered);
        }

        Ok(registry)
    }

    /// Canonical serialisation, tag included
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let file = RegistryFile {
            school: self.school.clone(),
            devices: self.devices(),
            hmac: hex::encode(self.mac()?.finalize().into_bytes()),
        };

        let mut bytes =
            serde_json::to_vec(&file).map_err(|e| LicenseError::Malformed(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Take a device slot for `device` if it does not already hold one.
    ///
    /// Fails with `DeviceLimit` when every slot is taken; the registry is left
    /// unchanged in that case.
    pub fn register(&mut self, device: &MachineId, max_devices: u32) -> Result<Registration> {
        if self.contains(device) {
            return Ok(Registration::AlreadyActive);
        }

        if self.devices.len() >= max_devices as usize {
            return Err(LicenseError::DeviceLimit(max_devices));
        }

        self.devices.insert(device.as_str().to_string());
        Ok(Registration::Added)
    }

    /// Rewrite the whole file through a temporary sibling and a rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(path);
        fs::write(&tmp, self.to_bytes()?)?;
        fs::rename(&tmp, path)?;

        info!(
            path = %path.display(),
            school = %self.school,
            devices = self.devices.len(),
            "Saved activation registry"
        );
        Ok(())
    }

    fn mac(&self) -> Result<HmacSha256> {
        let fields = TaggedFields {
            school: &self.school,
            devices: &self.devices,
        };
        let json =
            serde_json::to_vec(&fields).map_err(|e| LicenseError::Malformed(e.to_string()))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(REGISTRY_SECRET)
            .map_err(|e| LicenseError::Key(e.to_string()))?;
        mac.update(&json);
        Ok(mac)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "activation.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
