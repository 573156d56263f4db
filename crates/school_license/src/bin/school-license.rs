//! Vendor-side license tool
//!
//! ```text
//! school-license keygen --out keys/
//! school-license issue --key keys/vendor.key --school "Northfield Academy" \
//!     --expiry 2027-06-30 --max-devices 3 --out northfield.license
//! school-license inspect northfield.license
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use school_license::bundle::{generate_signing_key, signing_key_from_hex, vendor_key_hex};
use school_license::{generate_license, LicenseError, LicenseFile, LicensePayload, LicenseVerifier};

#[derive(Parser)]
#[command(name = "school-license", version, about = "Issue and inspect school-desk licenses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a vendor signing key pair (vendor.key / vendor.pub)
    Keygen {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Sign a license for one school
    Issue {
        /// Hex signing key written by `keygen`
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        school: String,
        /// Last valid day, YYYY-MM-DD
        #[arg(long)]
        expiry: NaiveDate,
        #[arg(long, default_value_t = 1)]
        max_devices: u32,
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify a license file and print its payload
    Inspect {
        file: PathBuf,
        /// Hex public key; defaults to the key compiled into this build
        #[arg(long)]
        public_key: Option<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LicenseError> {
    match cli.command {
        Command::Keygen { out } => {
            fs::create_dir_all(&out)?;
            let key = generate_signing_key();

            let key_path = out.join("vendor.key");
            let pub_path = out.join("vendor.pub");
            fs::write(&key_path, hex::encode(key.to_bytes()))?;
            fs::write(&pub_path, hex::encode(key.verifying_key().to_bytes()))?;

            info!(
                key = %key_path.display(),
                public = %pub_path.display(),
                "Generated vendor key pair; build the client with SCHOOL_LICENSE_VENDOR_KEY set to vendor.pub"
            );
        }
        Command::Issue {
            key,
            school,
            expiry,
            max_devices,
            out,
        } => {
            let signing_key = signing_key_from_hex(&fs::read_to_string(&key)?)?;
            let payload = LicensePayload {
                school,
                expiry,
                max_devices,
                issued: Some(Local::now().date_naive()),
            };

            generate_license(&signing_key, &payload)?.save(&out)?;
            info!(
                school = %payload.school,
                expiry = %payload.expiry,
                max_devices = payload.max_devices,
                out = %out.display(),
                "Issued license"
            );
        }
        Command::Inspect { file, public_key } => {
            let verifier = LicenseVerifier::from_hex(
                public_key.as_deref().unwrap_or_else(|| vendor_key_hex()),
            )?;
            let payload = verifier.verify(&LicenseFile::load(&file)?)?;
            let pretty = serde_json::to_string_pretty(&payload)
                .map_err(|e| LicenseError::Malformed(e.to_string()))?;
            println!("{}", pretty);
        }
    }

    Ok(())
}
