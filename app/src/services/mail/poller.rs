//! Background mailbox polling
//!
//! One dedicated thread runs a current-thread tokio runtime. Every interval
//! it opens an IMAP session, searches unseen mail inside the trailing window,
//! and stores what the relevance filter accepts. A failed message never stops
//! the batch; a failed cycle is logged and retried on the next tick.

use chrono::{DateTime, Utc};
use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::adapters::imap::{connection, unseen, MessageSource};
use crate::adapters::sqlite::DbPool;
use crate::config::MailboxConfig;
use crate::error::DeskError;

use super::events::{emit, MailEvent};
use super::ingest::{ingest_message, IngestedMessage};
use super::parse::ParsedEmail;
use super::relevance::RelevanceFilter;

/// Upper bound for `search_window_hours` (a leap year)
const MAX_SEARCH_WINDOW_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    Stopped,
    Running,
}

/// Counters for one polling cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub found: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One spawned worker. Each gets its own flag, so a worker detached by
/// `stop` never sees a later `start` set it again.
struct Worker {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    shutdown_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Everything the worker thread owns
struct PollContext {
    config: MailboxConfig,
    pool: DbPool,
    filter: RelevanceFilter,
    events: Sender<MailEvent>,
    running: Arc<AtomicBool>,
}

pub struct MailboxPoller {
    config: Option<MailboxConfig>,
    pool: DbPool,
    events_tx: Sender<MailEvent>,
    worker: Option<Worker>,
}

impl MailboxPoller {
    pub fn new(config: Option<MailboxConfig>, pool: DbPool) -> (Self, Receiver<MailEvent>) {
        let (tx, rx) = flume::unbounded();

        let poller = Self {
            config,
            pool,
            events_tx: tx,
            worker: None,
        };

        (poller, rx)
    }

    pub fn state(&self) -> PollerState {
        let running = self
            .worker
            .as_ref()
            .map_or(false, |w| w.running.load(Ordering::SeqCst));
        if running {
            PollerState::Running
        } else {
            PollerState::Stopped
        }
    }

    /// Start polling in the background.
    ///
    /// Returns `false` without doing anything when already running or when
    /// no mailbox credentials are configured.
    pub fn start(&mut self) -> Result<bool, DeskError> {
        if self.state() == PollerState::Running {
            debug!("Mailbox poller already running");
            return Ok(false);
        }
        // Reap a worker that exited on its own
        self.stop();

        let config = match &self.config {
            Some(config) if config.has_credentials() => config.clone(),
            _ => {
                info!("Mailbox credentials not configured, poller stays stopped");
                return Ok(false);
            }
        };

        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded(1);

        // Set before spawning so the loop sees it on its first check
        let running = Arc::new(AtomicBool::new(true));

        let ctx = PollContext {
            filter: RelevanceFilter::new(&config.keywords),
            config,
            pool: self.pool.clone(),
            events: self.events_tx.clone(),
            running: running.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name("mailbox-poller".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(poll_loop(&ctx, shutdown_rx)),
                    Err(e) => {
                        error!("Failed to build poller runtime: {}", e);
                        ctx.running.store(false, Ordering::SeqCst);
                    }
                }
                let _ = done_tx.send(());
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Err(DeskError::Io(format!("Failed to spawn poller thread: {}", e)));
            }
        };

        self.worker = Some(Worker {
            handle,
            running,
            shutdown_tx,
            done_rx,
        });

        info!("Mailbox poller started");
        Ok(true)
    }

    /// Stop polling and wait (bounded) for the worker.
    ///
    /// A worker stuck in network I/O past the timeout is detached; it exits
    /// on its own once it sees the cleared flag.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.running.store(false, Ordering::SeqCst);
        let _ = worker.shutdown_tx.try_send(());

        let timeout = Duration::from_secs(
            self.config
                .as_ref()
                .map(|c| c.stop_timeout_seconds)
                .unwrap_or(5),
        );

        match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Mailbox poller thread panicked");
                }
                info!("Mailbox poller stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Mailbox poller did not stop within {:?}, detaching worker",
                    timeout
                );
            }
        }
    }
}

#[cfg(test)]
impl MailboxPoller {
    fn worker_flag(&self) -> Option<Arc<AtomicBool>> {
        self.worker.as_ref().map(|w| w.running.clone())
    }
}

impl Drop for MailboxPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(ctx: &PollContext, shutdown_rx: Receiver<()>) {
    let period = Duration::from_secs(ctx.config.poll_interval_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        host = %ctx.config.host,
        folder = %ctx.config.folder,
        interval = ?period,
        "Starting poll loop"
    );

    let mut cycles = 0u64;

    while ctx.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.recv_async() => break,
        }

        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }

        cycles += 1;
        match run_cycle(ctx).await {
            Ok(stats) => {
                debug!(
                    cycle = cycles,
                    found = stats.found,
                    stored = stats.stored,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    "Poll cycle complete"
                );
            }
            Err(e) => {
                error!(cycle = cycles, "Poll cycle failed: {}", e);
                emit(
                    &ctx.events,
                    MailEvent::CycleFailed {
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    info!("Poll loop stopped after {} cycles", cycles);
}

/// Start of the UNSEEN search window, with the configured hours clamped
fn search_since(now: DateTime<Utc>, window_hours: i64) -> DateTime<Utc> {
    now - chrono::Duration::hours(window_hours.clamp(1, MAX_SEARCH_WINDOW_HOURS))
}

async fn run_cycle(ctx: &PollContext) -> Result<CycleStats, DeskError> {
    let cfg = &ctx.config;
    let mut conn = connection::connect(&cfg.host, cfg.port, &cfg.username, &cfg.password).await?;

    let since = search_since(Utc::now(), cfg.search_window_hours);
    let uids = match unseen::search_unseen_since(&mut conn, &cfg.folder, since).await {
        Ok(uids) => uids,
        Err(e) => {
            conn.logout().await;
            return Err(e);
        }
    };

    let stats = process_batch(ctx, &mut conn, &uids).await;

    conn.logout().await;
    Ok(stats)
}

/// Work through the UIDs in order; one failing message never stops the rest
async fn process_batch<S: MessageSource>(
    ctx: &PollContext,
    source: &mut S,
    uids: &[u32],
) -> CycleStats {
    let mut stats = CycleStats {
        found: uids.len(),
        ..Default::default()
    };

    for &uid in uids {
        if !ctx.running.load(Ordering::SeqCst) {
            debug!("Stop requested, leaving the rest of the batch");
            break;
        }

        match process_uid(ctx, source, uid).await {
            Ok(true) => stats.stored += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(uid, "Failed to process message: {}", e);
            }
        }
    }

    stats
}

/// Returns whether a new message was stored
async fn process_uid<S: MessageSource>(
    ctx: &PollContext,
    source: &mut S,
    uid: u32,
) -> Result<bool, DeskError> {
    let raw = source.fetch_raw(uid).await?;

    let Some(email) = triage(&ctx.pool, &ctx.filter, &raw)? else {
        return Ok(false);
    };

    if let Err(e) = source.mark_seen(uid).await {
        warn!(uid, "Failed to mark message seen: {}", e);
    }

    Ok(store_and_notify(&ctx.pool, &ctx.events, &email, Some(uid))?.is_some())
}

/// Parse and filter; `None` for mail the desk does not care about
pub(crate) fn triage(
    pool: &DbPool,
    filter: &RelevanceFilter,
    raw: &[u8],
) -> Result<Option<ParsedEmail>, DeskError> {
    let email = ParsedEmail::from_raw(raw)?;
    let relevance = filter.evaluate(pool, &email)?;

    if !relevance.is_relevant() {
        debug!(message_id = %email.message_id, "Ignoring irrelevant message");
        return Ok(None);
    }

    debug!(message_id = %email.message_id, relevance = ?relevance, "Relevant message");
    Ok(Some(email))
}

pub(crate) fn store_and_notify(
    pool: &DbPool,
    events: &Sender<MailEvent>,
    email: &ParsedEmail,
    imap_uid: Option<u32>,
) -> Result<Option<IngestedMessage>, DeskError> {
    let stored = ingest_message(pool, email, imap_uid)?;
    if let Some(stored) = &stored {
        emit(events, MailEvent::new_message(email, stored));
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{messages, pool};
    use crate::services::mail::parse::tests::raw_message;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    /// In-memory mailbox that records which UIDs were flagged, and whether
    /// the message was already stored at that moment
    struct ScriptedMailbox {
        pool: DbPool,
        messages: HashMap<u32, (String, Vec<u8>)>,
        seen: Vec<(u32, bool)>,
    }

    impl ScriptedMailbox {
        fn new(pool: DbPool) -> Self {
            Self {
                pool,
                messages: HashMap::new(),
                seen: Vec::new(),
            }
        }

        fn add(&mut self, uid: u32, message_id: &str, raw: Vec<u8>) {
            self.messages.insert(uid, (message_id.to_string(), raw));
        }
    }

    #[async_trait(?Send)]
    impl MessageSource for ScriptedMailbox {
        async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, DeskError> {
            self.messages
                .get(&uid)
                .map(|(_, raw)| raw.clone())
                .ok_or_else(|| DeskError::Backend(format!("FETCH {} failed: no such message", uid)))
        }

        async fn mark_seen(&mut self, uid: u32) -> Result<(), DeskError> {
            let stored = match self.messages.get(&uid) {
                Some((message_id, _)) => messages::is_tracked(&self.pool, message_id)?,
                None => false,
            };
            self.seen.push((uid, stored));
            Ok(())
        }
    }

    fn context(pool: DbPool, events: Sender<MailEvent>) -> PollContext {
        let config = mailbox("imap.northfield.edu", 993);
        PollContext {
            filter: RelevanceFilter::new(&config.keywords),
            config,
            pool,
            events,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    fn mailbox(host: &str, port: u16) -> MailboxConfig {
        crate::config::parse(&format!(
            r#"
            [mailbox]
            host = "{host}"
            port = {port}
            username = "office@northfield.edu"
            password = "secret"
            poll_interval_seconds = 3600
            "#
        ))
        .unwrap()
        .mailbox
        .unwrap()
    }

    #[test]
    fn test_start_without_config_is_noop() {
        let (mut poller, _rx) = MailboxPoller::new(None, pool::in_memory());
        assert!(!poller.start().unwrap());
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[test]
    fn test_start_without_credentials_is_noop() {
        let mut config = mailbox("imap.northfield.edu", 993);
        config.password.clear();

        let (mut poller, _rx) = MailboxPoller::new(Some(config), pool::in_memory());
        assert!(!poller.start().unwrap());
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (mut poller, _rx) = MailboxPoller::new(None, pool::in_memory());
        poller.stop();
        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[test]
    fn test_failed_cycle_emits_event_and_stop_joins() {
        // Nothing listens on port 1, so the connect fails at once
        let (mut poller, rx) = MailboxPoller::new(Some(mailbox("127.0.0.1", 1)), pool::in_memory());

        assert!(poller.start().unwrap());
        assert_eq!(poller.state(), PollerState::Running);
        assert!(!poller.start().unwrap());

        let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(event, MailEvent::CycleFailed { .. }));

        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[test]
    fn test_triage_filters_irrelevant_mail() {
        let pool = pool::in_memory();
        let filter = RelevanceFilter::new(&["student".to_string()]);

        let raw = raw_message("x@shop.example", "deals@shop.example", "Weekend sale", None, "50% off");
        assert!(triage(&pool, &filter, &raw).unwrap().is_none());

        let raw = raw_message("y@parents.example", "mary@parents.example", "Student pickup", None, "3pm");
        assert!(triage(&pool, &filter, &raw).unwrap().is_some());
    }

    #[test]
    fn test_triage_rejects_unparseable_mail() {
        let pool = pool::in_memory();
        let filter = RelevanceFilter::new(&["student".to_string()]);
        assert!(triage(&pool, &filter, b"Subject: student\r\n\r\nno sender").is_err());
    }

    #[test]
    fn test_store_and_notify_emits_once() {
        let pool = pool::in_memory();
        let (tx, rx) = flume::unbounded();
        let raw = raw_message("y@parents.example", "mary@parents.example", "Student pickup", None, "3pm");
        let email = ParsedEmail::from_raw(&raw).unwrap();

        let stored = store_and_notify(&pool, &tx, &email, Some(4)).unwrap();
        assert!(stored.is_some());
        assert!(store_and_notify(&pool, &tx, &email, Some(4)).unwrap().is_none());

        let events: Vec<MailEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            MailEvent::NewMessage { message_id, preview, .. } => {
                assert_eq!(message_id, "y@parents.example");
                assert_eq!(preview, "3pm");
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_continues_past_bad_message() {
        let pool = pool::in_memory();
        let (tx, rx) = flume::unbounded();
        let ctx = context(pool.clone(), tx);

        let mut inbox = ScriptedMailbox::new(pool.clone());
        inbox.add(
            11,
            "absence@parents.example",
            raw_message("absence@parents.example", "mary@parents.example", "Student absence", None, "Flu"),
        );
        inbox.add(12, "broken", b"Subject: student\r\n\r\nno sender".to_vec());
        inbox.add(
            13,
            "sale@shop.example",
            raw_message("sale@shop.example", "deals@shop.example", "Weekend sale", None, "50% off"),
        );
        inbox.add(
            14,
            "meds@clinic.example",
            raw_message("meds@clinic.example", "nurse@clinic.example", "Medication schedule", None, "9am"),
        );

        let stats = process_batch(&ctx, &mut inbox, &[11, 12, 13, 14]).await;

        assert_eq!(stats.found, 4);
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);

        // Only relevant mail is flagged, and before it is stored
        assert_eq!(inbox.seen, vec![(11, false), (14, false)]);
        assert!(messages::is_tracked(&pool, "absence@parents.example").unwrap());
        assert!(messages::is_tracked(&pool, "meds@clinic.example").unwrap());
        assert!(!messages::is_tracked(&pool, "sale@shop.example").unwrap());

        assert_eq!(rx.try_iter().count(), 2);
    }

    #[tokio::test]
    async fn test_batch_counts_fetch_failure() {
        let pool = pool::in_memory();
        let (tx, _rx) = flume::unbounded();
        let ctx = context(pool.clone(), tx);

        let mut inbox = ScriptedMailbox::new(pool.clone());
        inbox.add(
            21,
            "trip@parents.example",
            raw_message("trip@parents.example", "mary@parents.example", "School trip", None, "Yes"),
        );

        let stats = process_batch(&ctx, &mut inbox, &[20, 21]).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.stored, 1);
        assert_eq!(inbox.seen, vec![(21, false)]);
    }

    #[tokio::test]
    async fn test_batch_stops_when_flag_cleared() {
        let pool = pool::in_memory();
        let (tx, _rx) = flume::unbounded();
        let ctx = context(pool.clone(), tx);
        ctx.running.store(false, Ordering::SeqCst);

        let mut inbox = ScriptedMailbox::new(pool.clone());
        inbox.add(
            31,
            "trip@parents.example",
            raw_message("trip@parents.example", "mary@parents.example", "School trip", None, "Yes"),
        );

        let stats = process_batch(&ctx, &mut inbox, &[31]).await;
        assert_eq!(stats.found, 1);
        assert_eq!(stats.stored + stats.skipped + stats.failed, 0);
        assert!(inbox.seen.is_empty());
    }

    #[test]
    fn test_restart_does_not_revive_detached_worker() {
        // Accepts TCP connections but never answers the TLS handshake
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = mailbox("127.0.0.1", port);
        config.stop_timeout_seconds = 1;

        let (mut poller, _rx) = MailboxPoller::new(Some(config), pool::in_memory());
        assert!(poller.start().unwrap());
        let first = poller.worker_flag().unwrap();

        // Let the worker get stuck in the handshake
        std::thread::sleep(Duration::from_millis(300));
        poller.stop();
        assert!(!first.load(Ordering::SeqCst));

        assert!(poller.start().unwrap());
        let second = poller.worker_flag().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
        assert_eq!(poller.state(), PollerState::Running);

        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);
        drop(listener);
    }

    #[test]
    fn test_search_window_is_clamped() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        assert_eq!(search_since(now, 24), now - chrono::Duration::hours(24));
        assert_eq!(search_since(now, 0), now - chrono::Duration::hours(1));
        assert_eq!(
            search_since(now, 10_000_000_000),
            now - chrono::Duration::hours(MAX_SEARCH_WINDOW_HOURS)
        );
    }
}
