//! # Watchdog
//!
//! Periodic observer running alongside the downloader.
//!
//! - Tells a slow connection from a dead one: after a discard, the source
//!   must deliver at least its pending bytes plus one chunk within the
//!   connection timeout, or the session is forced to reconnect.
//! - Polls the decoder position and reports it as `now_playing`.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info_span, warn};

use crate::config::{DOWNLOAD_CHUNK_BYTES, WATCHDOG_INTERVAL};
use crate::error::Result;
use crate::session::{Activity, Session};

/// Outcome of one stale-connection observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No discard outstanding.
    Idle,
    /// A discard is outstanding and the timeout has not passed.
    Watching,
    /// Enough data arrived after the discard.
    Healthy,
    /// The timeout passed without enough data.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Tracking {
    started_at_ms: i64,
    downloaded_at_start: u64,
}

/// Clock-driven stale-connection detection.
#[derive(Debug, Default)]
pub struct StaleConnectionDetector {
    tracking: Option<Tracking>,
}

impl StaleConnectionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation.
    ///
    /// `pending_at_discard` is the outstanding discard record, if any. The
    /// first observation of a discard starts the timer.
    pub fn observe(
        &mut self,
        pending_at_discard: Option<u64>,
        total_downloaded: u64,
        now_ms: i64,
        timeout: Duration,
    ) -> Verdict {
        let Some(pending) = pending_at_discard else {
            self.tracking = None;
            return Verdict::Idle;
        };

        let tracking = *self.tracking.get_or_insert(Tracking {
            started_at_ms: now_ms,
            downloaded_at_start: total_downloaded,
        });

        let arrived = total_downloaded.saturating_sub(tracking.downloaded_at_start);
        if arrived >= pending + DOWNLOAD_CHUNK_BYTES as u64 {
            self.tracking = None;
            return Verdict::Healthy;
        }

        let elapsed_ms = now_ms.saturating_sub(tracking.started_at_ms);
        if elapsed_ms > timeout.as_millis() as i64 {
            self.tracking = None;
            return Verdict::Stale;
        }

        Verdict::Watching
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }
}

/// Start the watchdog thread. It exits once the session closes or is dropped.
pub(crate) fn spawn(session: &Arc<Session>) -> Result<JoinHandle<()>> {
    let weak = Arc::downgrade(session);
    let name = format!("netstream-watchdog-{}", session.id);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || run(weak))?;
    Ok(handle)
}

fn run(weak: Weak<Session>) {
    let mut detector = StaleConnectionDetector::new();

    loop {
        {
            let Some(session) = weak.upgrade() else {
                return;
            };
            let _span = info_span!("watchdog", session = %session.id).entered();

            if session.is_closing() {
                debug!("Watchdog stopping");
                return;
            }

            tick(&session, &mut detector);
            session.poll_now_playing();
        }
        thread::sleep(WATCHDOG_INTERVAL);
    }
}

fn tick(session: &Arc<Session>, detector: &mut StaleConnectionDetector) {
    let (pending, total_downloaded, generation, reconnectable) = {
        let st = session.lock_state();
        (
            st.discard.map(|d| d.pending_at_source),
            st.total_downloaded,
            st.generation,
            st.activity == Activity::Downloading && !st.user_seek,
        )
    };

    let timeout = session.config.read().connection_timeout;
    let now_ms = session.clock.unix_timestamp_millis();

    match detector.observe(pending, total_downloaded, now_ms, timeout) {
        Verdict::Stale if reconnectable => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Connection stalled after discard, forcing reconnect"
            );
            session.reconnect(generation);
        }
        Verdict::Stale => {
            debug!("Download not active, dropping stale discard");
            session.clear_discard();
        }
        Verdict::Healthy => {
            debug!("Discarded space refilled");
            session.clear_discard();
        }
        Verdict::Idle | Verdict::Watching => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(6000);

    #[test]
    fn idle_without_discard() {
        let mut detector = StaleConnectionDetector::new();
        assert_eq!(detector.observe(None, 500, 0, TIMEOUT), Verdict::Idle);
        assert!(!detector.is_tracking());
    }

    #[test]
    fn stale_after_timeout_without_data() {
        let mut detector = StaleConnectionDetector::new();

        assert_eq!(detector.observe(Some(0), 1000, 10_000, TIMEOUT), Verdict::Watching);
        assert_eq!(detector.observe(Some(0), 1500, 16_000, TIMEOUT), Verdict::Watching);
        assert_eq!(detector.observe(Some(0), 1500, 16_001, TIMEOUT), Verdict::Stale);
        assert!(!detector.is_tracking());
    }

    #[test]
    fn healthy_once_pending_plus_chunk_arrived() {
        let mut detector = StaleConnectionDetector::new();

        detector.observe(Some(4096), 0, 0, TIMEOUT);
        assert_eq!(detector.observe(Some(4096), 5119, 100, TIMEOUT), Verdict::Watching);
        assert_eq!(detector.observe(Some(4096), 5120, 200, TIMEOUT), Verdict::Healthy);
    }

    #[test]
    fn cleared_discard_resets_the_timer() {
        let mut detector = StaleConnectionDetector::new();

        detector.observe(Some(0), 0, 0, TIMEOUT);
        detector.observe(None, 0, 5_000, TIMEOUT);
        assert_eq!(detector.observe(Some(0), 0, 7_000, TIMEOUT), Verdict::Watching);
        assert_eq!(detector.observe(Some(0), 0, 13_001, TIMEOUT), Verdict::Stale);
    }
}
