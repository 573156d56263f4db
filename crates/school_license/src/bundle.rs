//! Vendor-signed license bundle
//!
//! On disk a license is a small JSON document:
//!
//! ```json
//! {"payload": "<base64 payload JSON>", "signature": "<base64 Ed25519 signature>"}
//! ```
//!
//! The signature covers the raw payload bytes (the decoded base64), so the
//! payload is verified exactly as the vendor tool serialised it.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::NaiveDate;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LicenseError, Result};

/// Development verify key (hex). Release builds set `SCHOOL_LICENSE_VENDOR_KEY`
/// at compile time to the public half of the vendor's signing key.
const DEV_VENDOR_KEY_HEX: &str =
    "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

/// Hex-encoded vendor verify key compiled into this build
pub fn vendor_key_hex() -> &'static str {
    option_env!("SCHOOL_LICENSE_VENDOR_KEY").unwrap_or(DEV_VENDOR_KEY_HEX)
}

/// Entitlement described by a license
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    /// Tenant identifier
    pub school: String,
    /// Last day the license is valid (inclusive)
    pub expiry: NaiveDate,
    /// How many machines may activate this license
    pub max_devices: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<NaiveDate>,
}

impl LicensePayload {
    /// A license is still valid on its expiry date.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry < today
    }
}

/// License file as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFile {
    pub payload: String,
    pub signature: String,
}

impl LicenseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LicenseError::Io(format!("Failed to read license {}: {}", path.display(), e))
        })?;

        // An unreadable envelope is treated like a bad signature
        serde_json::from_str(&content).map_err(|e| {
            debug!("License envelope rejected: {}", e);
            LicenseError::InvalidSignature
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LicenseError::Malformed(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Sign a payload with the vendor key (vendor side, offline)
pub fn generate_license(key: &SigningKey, payload: &LicensePayload) -> Result<LicenseFile> {
    let payload_json =
        serde_json::to_vec(payload).map_err(|e| LicenseError::Malformed(e.to_string()))?;
    let signature = key.sign(&payload_json);

    debug!(
        school = %payload.school,
        expiry = %payload.expiry,
        max_devices = payload.max_devices,
        "Signed license payload"
    );

    Ok(LicenseFile {
        payload: BASE64.encode(&payload_json),
        signature: BASE64.encode(signature.to_bytes()),
    })
}

/// Create a fresh vendor signing key
pub fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Parse a signing key stored as 64 hex chars (the 32-byte seed)
pub fn signing_key_from_hex(hex_seed: &str) -> Result<SigningKey> {
    let seed: [u8; 32] = hex::decode(hex_seed.trim())
        .map_err(|e| LicenseError::Key(format!("Invalid signing key hex: {}", e)))?
        .try_into()
        .map_err(|_| LicenseError::Key("Signing key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Client-side signature check
pub struct LicenseVerifier {
    key: VerifyingKey,
}

impl LicenseVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Verifier for the vendor key compiled into this build
    pub fn embedded() -> Result<Self> {
        Self::from_hex(vendor_key_hex())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(hex_key.trim())
            .map_err(|e| LicenseError::Key(format!("Invalid public key hex: {}", e)))?
            .try_into()
            .map_err(|_| LicenseError::Key("Public key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| LicenseError::Key(format!("Invalid public key: {}", e)))?;
        Ok(Self { key })
    }

    /// Verify the signature, then parse the payload.
    ///
    /// Any decoding or signature problem is reported as `InvalidSignature`;
    /// nothing from an unverified payload is trusted.
    pub fn verify(&self, license: &LicenseFile) -> Result<LicensePayload> {
        let payload_bytes = BASE64
            .decode(license.payload.trim())
            .map_err(|_| LicenseError::InvalidSignature)?;
        let signature_bytes = BASE64
            .decode(license.signature.trim())
            .map_err(|_| LicenseError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| LicenseError::InvalidSignature)?;

        self.key
            .verify(&payload_bytes, &signature)
            .map_err(|_| LicenseError::InvalidSignature)?;

        serde_json::from_slice(&payload_bytes).map_err(|e| LicenseError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn payload() -> LicensePayload {
        LicensePayload {
            school: "Northfield Academy".to_string(),
            expiry: NaiveDate::from_ymd_opt(2030, 6, 30).unwrap(),
            max_devices: 3,
            issued: NaiveDate::from_ymd_opt(2026, 1, 15),
        }
    }

    #[test]
    fn test_signed_license_verifies() {
        let key = test_key();
        let license = generate_license(&key, &payload()).unwrap();

        let verifier = LicenseVerifier::new(key.verifying_key());
        assert_eq!(verifier.verify(&license).unwrap(), payload());
    }

    #[test]
    fn test_modified_payload_rejected() {
        let key = test_key();
        let mut license = generate_license(&key, &payload()).unwrap();

        let mut forged = payload();
        forged.max_devices = 300;
        license.payload = BASE64.encode(serde_json::to_vec(&forged).unwrap());

        let verifier = LicenseVerifier::new(key.verifying_key());
        assert!(matches!(
            verifier.verify(&license),
            Err(LicenseError::InvalidSignature)
        ));
    }

    #[test]
    fn test_other_vendor_key_rejected() {
        let license = generate_license(&test_key(), &payload()).unwrap();
        let other = SigningKey::from_bytes(&[9u8; 32]);

        let verifier = LicenseVerifier::new(other.verifying_key());
        assert!(matches!(
            verifier.verify(&license),
            Err(LicenseError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_encoding_rejected() {
        let verifier = LicenseVerifier::new(test_key().verifying_key());
        let license = LicenseFile {
            payload: "not base64!!".to_string(),
            signature: "AAAA".to_string(),
        };
        assert!(matches!(
            verifier.verify(&license),
            Err(LicenseError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unreadable_license_file_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let not_json = dir.path().join("broken.json");
        fs::write(&not_json, "{ payload: ").unwrap();
        assert!(matches!(
            LicenseFile::load(&not_json),
            Err(LicenseError::InvalidSignature)
        ));

        let unsigned = dir.path().join("unsigned.json");
        fs::write(&unsigned, r#"{"payload":"e30="}"#).unwrap();
        let err = LicenseFile::load(&unsigned).unwrap_err();
        assert_eq!(err.to_string(), "Invalid or tampered license");
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let p = payload();
        assert!(!p.is_expired(p.expiry));
        assert!(p.is_expired(p.expiry.succ_opt().unwrap()));
    }

    #[test]
    fn test_embedded_key_parses() {
        assert!(LicenseVerifier::embedded().is_ok());
    }

    #[test]
    fn test_signing_key_hex_roundtrip() {
        let key = test_key();
        let restored = signing_key_from_hex(&hex::encode(key.to_bytes())).unwrap();
        assert_eq!(restored.verifying_key(), key.verifying_key());

        assert!(signing_key_from_hex("abcd").is_err());
    }
}
