//! Client-side license check
//!
//! Order matters: the signature is checked before anything in the payload is
//! read, and the registry is only written after every other check passed.

use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bundle::{LicenseFile, LicenseVerifier};
use crate::device::MachineId;
use crate::error::{LicenseError, Result};
use crate::registry::{ActivationRegistry, Registration};

/// Inputs that come from the environment rather than from files
#[derive(Debug, Clone)]
pub struct ActivationContext {
    pub today: NaiveDate,
    pub machine_id: MachineId,
}

impl ActivationContext {
    /// Local date and the identifier of this machine
    pub fn current() -> Result<Self> {
        Ok(Self {
            today: Local::now().date_naive(),
            machine_id: MachineId::current()?,
        })
    }
}

/// A successful check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub school: String,
    pub expiry: NaiveDate,
    pub devices_used: usize,
    pub max_devices: u32,
    /// True when this check took a new device slot
    pub newly_registered: bool,
}

/// Result handed to the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseStatus {
    pub success: bool,
    pub message: String,
}

impl From<Result<Activation>> for LicenseStatus {
    fn from(outcome: Result<Activation>) -> Self {
        match outcome {
            Ok(activation) => Self {
                success: true,
                message: format!(
                    "License valid for {} until {} ({}/{} devices)",
                    activation.school,
                    activation.expiry,
                    activation.devices_used,
                    activation.max_devices
                ),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// Verify the license and bind this machine to it
pub fn check_license(
    verifier: &LicenseVerifier,
    license_path: &Path,
    registry_path: &Path,
    ctx: &ActivationContext,
) -> Result<Activation> {
    let license = LicenseFile::load(license_path)?;
    let payload = verifier.verify(&license)?;

    if payload.is_expired(ctx.today) {
        return Err(LicenseError::Expired(payload.expiry));
    }

    let mut registry = ActivationRegistry::load_or_init(registry_path, &payload.school)?;

    if registry.school() != payload.school {
        return Err(LicenseError::SchoolMismatch {
            registry: registry.school().to_string(),
            license: payload.school,
        });
    }

    let registration = registry.register(&ctx.machine_id, payload.max_devices)?;
    if registration == Registration::Added {
        registry.save(registry_path)?;
        info!(
            school = %payload.school,
            device = %ctx.machine_id,
            used = registry.len(),
            max = payload.max_devices,
            "Activated license on new device"
        );
    } else {
        debug!(device = %ctx.machine_id, "Device already activated");
    }

    Ok(Activation {
        school: payload.school,
        expiry: payload.expiry,
        devices_used: registry.len(),
        max_devices: payload.max_devices,
        newly_registered: registration == Registration::Added,
    })
}

/// Decide whether the application may run on this machine.
///
/// Never fails: every problem is folded into the returned status.
pub fn ensure_license_ok(license_path: &Path, registry_path: &Path) -> LicenseStatus {
    let outcome = LicenseVerifier::embedded().and_then(|verifier| {
        let ctx = ActivationContext::current()?;
        check_license(&verifier, license_path, registry_path, &ctx)
    });

    if let Err(e) = &outcome {
        warn!(license = %license_path.display(), "License check failed: {}", e);
    }

    outcome.into()
}
