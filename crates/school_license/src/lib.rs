//! School Desk licensing
//!
//! Offline licensing for the desktop client, in two halves:
//!
//! - `bundle`: the vendor-signed license (`payload` + detached Ed25519
//!   `signature`), issued once per school by the `school-license` tool.
//! - `registry`: the local activation file listing the machines that consumed
//!   a device slot, protected by an HMAC tag.
//!
//! `check::ensure_license_ok` ties both together and never returns an error;
//! callers get a `LicenseStatus` with a human-readable message.
//!
//! The registry secret and the vendor key are compiled into the client. This
//! gives tamper evidence against casual editing of the activation file, not
//! protection against someone patching the binary.

pub mod bundle;
pub mod check;
pub mod device;
pub mod error;
pub mod registry;

pub use bundle::{generate_license, LicenseFile, LicensePayload, LicenseVerifier};
pub use check::{check_license, ensure_license_ok, Activation, ActivationContext, LicenseStatus};
pub use device::MachineId;
pub use error::{LicenseError, Result};
pub use registry::{ActivationRegistry, Registration};
