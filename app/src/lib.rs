//! School Desk - license-gated desk client core
//!
//! Checks the school license on startup, then polls the office mailbox and
//! threads relevant mail into conversations for the GUI layer.
//!
//! ## Module Organization
//!
//! - `adapters/`: SQLite storage and IMAP access
//! - `services/`: Mailbox ingestion (parse, filter, thread, notify)
//! - `config/`: Configuration management
//! - `error`: Application error type

pub mod adapters;
pub mod config;
pub mod error;
pub mod services;

use tracing::{info, warn};

use crate::error::{DeskError, Result};
use crate::services::mail::{MailEvent, MailboxPoller};

/// Run the desk until Ctrl-C.
///
/// Nothing else starts unless the license check passes.
pub fn run() -> Result<()> {
    info!("Starting school desk ...");

    let config = config::load()?;

    let status = school_license::ensure_license_ok(
        &config.license.license_file,
        &config.license.activation_file,
    );
    if !status.success {
        return Err(DeskError::License(status.message));
    }
    info!("{}", status.message);

    let pool = adapters::sqlite::open(&config.database.path)?;

    let (mut poller, events) = MailboxPoller::new(config.mailbox.clone(), pool);
    if !poller.start()? {
        warn!("Mailbox polling is off; add a [mailbox] section with credentials to enable it");
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => log_event(&event),
                    Err(_) => break,
                },
                _ = &mut ctrl_c => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
    });

    poller.stop();
    info!("School desk stopped");
    Ok(())
}

fn log_event(event: &MailEvent) {
    match event {
        MailEvent::NewMessage {
            conversation_id,
            from,
            subject,
            preview,
            new_conversation,
            ..
        } => info!(
            conversation_id,
            new_conversation,
            "New message from {}: {} - {}",
            from,
            subject,
            preview
        ),
        MailEvent::CycleFailed { error } => warn!("Mailbox check failed: {}", error),
    }
}
