//! # Streaming Session
//!
//! Shared core behind a [`StreamingPlayer`](crate::player::StreamingPlayer).
//! The downloader, the feed reader and the watchdog all hold references to one
//! `Session`, which owns the ring buffer, the connection and the thread
//! handles.
//!
//! ## Coordination
//!
//! A single [`SessionState`] value replaces ad-hoc flags. Its `generation`
//! identifies the live downloader; bumping it retires every older one. Waits
//! use `changed` with the state lock held while the predicate is evaluated,
//! and every wait is capped at [`STATE_WAIT`].
//!
//! Lock order: read lock, then connection, then session state, then ring
//! internals. `activity` and `generation` only change with the connection lock
//! held, except for `Closing`, which `close` sets first so that in-flight
//! reconnects stop early.

use bridge_traits::playback::{DecoderEvent, DecoderEventSink, MediaDecoder, PlaybackSessionId};
use bridge_traits::time::Clock;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{PlayerState, StreamingConfig, StreamingStats};
use crate::connection::{ConnectionManager, OpenedSource, SharedSource};
use crate::downloader;
use crate::error::{Result, StreamingError, StreamingErrorCode};
use crate::listener::ListenerSlot;
use crate::locator::ConnectionKind;
use crate::ring_buffer::RingBuffer;

/// Cap on any single wait for a session state change.
pub(crate) const STATE_WAIT: Duration = Duration::from_millis(100);

/// Slice of a reconnect's attempt to take the connection lock.
const RECONNECT_LOCK_WAIT: Duration = Duration::from_millis(50);

// ============================================================================
// Session State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Idle,
    Downloading,
    Refetching,
    Reconnecting,
    Closing,
}

/// A discard the watchdog has not yet seen refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DiscardRecord {
    pub pending_at_source: u64,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub activity: Activity,
    pub generation: u64,
    pub user_seek: bool,
    pub initial_buffering_complete: bool,
    pub download_complete: bool,
    pub discard: Option<DiscardRecord>,
    pub total_downloaded: u64,
    pub total_buffered: u64,
    pub reconnects: u32,
    pub discards: u32,
}

impl SessionState {
    fn new() -> Self {
        Self {
            activity: Activity::Idle,
            generation: 0,
            user_seek: false,
            initial_buffering_complete: false,
            download_complete: false,
            discard: None,
            total_downloaded: 0,
            total_buffered: 0,
            reconnects: 0,
            discards: 0,
        }
    }

    /// `generation` still owns the download and the session is not closing.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.activity != Activity::Closing
    }

    pub fn is_closing(&self) -> bool {
        self.activity == Activity::Closing
    }

    /// Retire the current downloader and start a fresh fetch session.
    fn begin_fetch(&mut self, activity: Activity) -> Option<u64> {
        if self.is_closing() {
            return None;
        }
        self.activity = activity;
        self.generation += 1;
        self.initial_buffering_complete = false;
        self.download_complete = false;
        self.discard = None;
        self.total_downloaded = 0;
        self.total_buffered = 0;
        Some(self.generation)
    }
}

// ============================================================================
// Seek Gate
// ============================================================================

/// Admits one user seek at a time.
#[derive(Default)]
pub(crate) struct SeekGate {
    busy: Mutex<bool>,
    released: Condvar,
}

impl SeekGate {
    pub fn acquire(&self) -> SeekPermit<'_> {
        let mut busy = self.busy.lock();
        while *busy {
            self.released.wait_for(&mut busy, STATE_WAIT);
        }
        *busy = true;
        SeekPermit { gate: self }
    }
}

pub(crate) struct SeekPermit<'a> {
    gate: &'a SeekGate,
}

impl Drop for SeekPermit<'_> {
    fn drop(&mut self) {
        *self.gate.busy.lock() = false;
        self.gate.released.notify_one();
    }
}

// ============================================================================
// Session
// ============================================================================

pub(crate) struct Session {
    pub id: PlaybackSessionId,
    pub kind: ConnectionKind,
    pub config: RwLock<StreamingConfig>,
    pub listener: ListenerSlot,
    pub clock: Arc<dyn Clock>,
    pub connection: Mutex<ConnectionManager>,
    /// Guards the read cursor and the discard sequence.
    pub reader: Mutex<()>,
    pub feed_paused: AtomicBool,
    pub seek_gate: SeekGate,
    pub decoder: Mutex<Option<Box<dyn MediaDecoder>>>,
    pub player_state: Mutex<PlayerState>,
    ring: OnceLock<RingBuffer>,
    state: Mutex<SessionState>,
    changed: Condvar,
    downloader: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        config: StreamingConfig,
        connection: ConnectionManager,
        decoder: Box<dyn MediaDecoder>,
        listener: ListenerSlot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: PlaybackSessionId::new(),
            kind: connection.kind(),
            config: RwLock::new(config),
            listener,
            clock,
            connection: Mutex::new(connection),
            reader: Mutex::new(()),
            feed_paused: AtomicBool::new(false),
            seek_gate: SeekGate::default(),
            decoder: Mutex::new(Some(decoder)),
            player_state: Mutex::new(PlayerState::Unrealized),
            ring: OnceLock::new(),
            state: Mutex::new(SessionState::new()),
            changed: Condvar::new(),
            downloader: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------------
    // State access
    // ------------------------------------------------------------------------

    pub fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Mutate the state and wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.changed.notify_all();
        result
    }

    /// Release `guard` until the state changes or [`STATE_WAIT`] passes.
    pub fn wait_on(&self, guard: &mut MutexGuard<'_, SessionState>) {
        self.changed.wait_for(guard, STATE_WAIT);
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.state.lock().is_current(generation)
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().is_closing()
    }

    /// Set `activity` if `generation` is still live.
    fn set_activity(&self, generation: u64, activity: Activity) {
        self.update(|st| {
            if st.is_current(generation) {
                st.activity = activity;
            }
        });
    }

    /// Sleep up to `timeout`, returning early with `true` once closing.
    fn sleep_unless_closing(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_closing() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.is_closing()
    }

    pub fn ring(&self) -> Option<&RingBuffer> {
        self.ring.get()
    }

    pub fn ensure_ring(&self) -> &RingBuffer {
        self.ring
            .get_or_init(|| RingBuffer::new(self.config.read().buffer_capacity_bytes))
    }

    pub fn player_state(&self) -> PlayerState {
        *self.player_state.lock()
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    pub fn emit_error(&self, code: StreamingErrorCode) {
        self.listener.emit(|l| l.streaming_error(code));
    }

    pub fn emit_window(&self) {
        if let Some(ring) = self.ring() {
            let window = ring.window();
            self.listener
                .emit(|l| l.buffer_status_changed(window.start, window.len()));
        }
    }

    pub fn emit_now_reading(&self, offset: u64) {
        self.listener.emit(|l| l.now_reading(offset));
    }

    fn emit_learned_length(&self, opened: &OpenedSource) {
        if let Some(length) = opened.learned_length {
            self.listener.emit(|l| l.content_length_updated(Some(length)));
        }
    }

    fn close_connection(&self, conn: &mut ConnectionManager) {
        if let Err(e) = conn.close() {
            warn!(session = %self.id, error = %e, "Failed to close connection");
            self.emit_error(StreamingErrorCode::ClosingConnection);
        }
    }

    // ------------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------------

    /// Open the source at offset 0 and start downloading.
    pub fn open_stream(self: &Arc<Self>) -> Result<()> {
        let ring = self.ensure_ring();
        let mut conn = self.connection.lock();

        let generation = self
            .update(|st| st.begin_fetch(Activity::Downloading))
            .ok_or_else(|| StreamingError::invalid_state("realize", PlayerState::Closed))?;

        ring.reset_to(0);
        let opened = match conn.open(0) {
            Ok(opened) => opened,
            Err(e) => {
                self.set_activity(generation, Activity::Idle);
                drop(conn);
                error!(session = %self.id, error = %e, "Failed to open connection");
                self.emit_error(StreamingErrorCode::OpeningConnection);
                return Err(e);
            }
        };

        self.spawn_downloader(generation, opened.source.clone())?;
        drop(conn);

        self.emit_learned_length(&opened);
        Ok(())
    }

    pub fn spawn_downloader(self: &Arc<Self>, generation: u64, source: SharedSource) -> Result<()> {
        let writer = self.ensure_ring().writer();
        let session = Arc::clone(self);

        self.set_activity(generation, Activity::Downloading);
        let handle = thread::Builder::new()
            .name(format!("netstream-download-{}", generation))
            .spawn(move || downloader::run(session, generation, source, writer))
            .map_err(|e| {
                self.set_activity(generation, Activity::Idle);
                StreamingError::Io(e)
            })?;
        *self.downloader.lock() = Some(handle);

        debug!(session = %self.id, generation, "Downloader started");
        Ok(())
    }

    /// Replace a failed or stale connection with a fresh one at the current
    /// download position. No-op unless `generation` is still live.
    pub fn reconnect(self: &Arc<Self>, generation: u64) {
        let mut conn = loop {
            if !self.is_current(generation) {
                return;
            }
            if let Some(conn) = self.connection.try_lock_for(RECONNECT_LOCK_WAIT) {
                break conn;
            }
        };

        let next = self.update(|st| {
            if !st.is_current(generation) || st.activity == Activity::Reconnecting {
                return None;
            }
            st.activity = Activity::Reconnecting;
            st.generation += 1;
            st.discard = None;
            st.reconnects += 1;
            Some(st.generation)
        });
        let Some(next) = next else {
            return;
        };

        let ring = self.ensure_ring();
        ring.abort_writers();
        self.close_connection(&mut conn);

        let offset = ring.source_end();
        let policy = self.config.read().reconnect_policy();
        info!(session = %self.id, offset, generation = next, "Reconnecting");

        if self.kind != ConnectionKind::RawStream {
            for attempt in 1..=policy.max_attempts {
                if self.is_closing() {
                    return;
                }

                match conn.open(offset) {
                    Ok(opened) => {
                        if !self.is_current(next) {
                            self.close_connection(&mut conn);
                            return;
                        }
                        if let Err(e) = self.spawn_downloader(next, opened.source.clone()) {
                            error!(session = %self.id, error = %e, "Failed to spawn downloader");
                            break;
                        }
                        drop(conn);
                        self.emit_learned_length(&opened);
                        info!(session = %self.id, offset, attempt, "Reconnected");
                        return;
                    }
                    Err(e) => {
                        warn!(session = %self.id, attempt, error = %e, "Reconnect attempt failed");
                        if attempt < policy.max_attempts
                            && self.sleep_unless_closing(policy.delay_for_attempt(attempt))
                        {
                            return;
                        }
                    }
                }
            }
        }

        self.set_activity(next, Activity::Idle);
        drop(conn);
        error!(session = %self.id, "Giving up on reconnect");
        self.emit_error(StreamingErrorCode::OpeningConnection);
    }

    /// Tear down and re-fetch so that `target` is served after a pre-roll.
    /// Blocks until the new fetch finishes initial buffering.
    pub fn refetch_from(self: &Arc<Self>, target: u64) -> Result<u64> {
        let start = target.saturating_sub(self.config.read().seek_buffer_bytes());
        let ring = self.ensure_ring();

        let generation = {
            let mut conn = self.connection.lock();
            let generation = self
                .update(|st| st.begin_fetch(Activity::Refetching))
                .ok_or_else(|| StreamingError::Seek("session is closing".to_string()))?;

            ring.abort_writers();
            self.close_connection(&mut conn);
            ring.reset_to(start);

            info!(session = %self.id, target, start, "Re-fetching for seek");

            let opened = match conn.open(start) {
                Ok(opened) => opened,
                Err(e) => {
                    self.set_activity(generation, Activity::Idle);
                    return Err(StreamingError::Seek(e.to_string()));
                }
            };
            self.spawn_downloader(generation, opened.source.clone())?;
            drop(conn);

            self.emit_learned_length(&opened);
            generation
        };

        {
            let mut state = self.state.lock();
            while !state.initial_buffering_complete
                && state.is_current(generation)
                && state.activity != Activity::Idle
            {
                self.wait_on(&mut state);
            }
            if !state.is_current(generation) {
                return Ok(ring.read_offset());
            }
            if !state.initial_buffering_complete {
                return Err(StreamingError::Seek(
                    "connection lost while buffering".to_string(),
                ));
            }
        }

        ring.skip(target - start);
        let now = ring.read_offset();
        self.emit_now_reading(now);
        Ok(now)
    }

    /// Seek the open local file in place and restart the downloader there.
    pub fn reposition_file(self: &Arc<Self>, target: u64) -> Result<u64> {
        let ring = self.ensure_ring();
        let mut conn = self.connection.lock();

        let generation = self
            .update(|st| {
                if st.is_closing() {
                    return None;
                }
                st.generation += 1;
                st.download_complete = false;
                st.discard = None;
                Some(st.generation)
            })
            .ok_or_else(|| StreamingError::Seek("session is closing".to_string()))?;

        ring.abort_writers();
        let previous = self.downloader.lock().take();
        if let Some(handle) = previous {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(session = %self.id, "Downloader panicked");
            }
        }

        let reached = match conn.seek_active(target) {
            Ok(reached) => Ok(reached),
            Err(e) => {
                debug!(error = %e, "In-place seek failed, reopening file");
                conn.open(target).map(|opened| opened.offset)
            }
        };
        let reached = match reached {
            Ok(reached) => reached,
            Err(e) => {
                self.set_activity(generation, Activity::Idle);
                return Err(StreamingError::Seek(e.to_string()));
            }
        };

        ring.reset_to(reached);
        let source = conn
            .active()
            .ok_or_else(|| StreamingError::Seek("file closed".to_string()))?;
        self.spawn_downloader(generation, source)?;
        drop(conn);

        debug!(session = %self.id, target, reached, "File repositioned");
        self.emit_now_reading(reached);
        self.emit_window();
        Ok(reached)
    }

    /// Run `f` as a user seek: one at a time, with reconnects suppressed.
    pub fn user_seek<R>(&self, f: impl FnOnce() -> R) -> R {
        let _permit = self.seek_gate.acquire();
        self.update(|st| st.user_seek = true);
        let result = f();
        self.update(|st| st.user_seek = false);
        result
    }

    /// Forget the pending discard after the watchdog saw it refilled.
    pub fn clear_discard(&self) {
        self.update(|st| st.discard = None);
    }

    // ------------------------------------------------------------------------
    // Decoder
    // ------------------------------------------------------------------------

    /// Run `f` against the decoder. A close that raced the call releases the
    /// decoder here, since `close` cannot take a busy decoder.
    pub fn with_decoder<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn MediaDecoder) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.decoder.lock();
        let decoder = guard
            .as_mut()
            .ok_or_else(|| StreamingError::invalid_state(operation, PlayerState::Closed))?;

        let result = f(decoder.as_mut());

        if self.player_state() == PlayerState::Closed {
            if let Some(decoder) = guard.take() {
                release_decoder(decoder);
            }
        }
        result
    }

    /// Emit the decoder position unless the decoder is busy or not ready.
    pub fn poll_now_playing(&self) {
        let position = match self.decoder.try_lock() {
            Some(guard) => guard.as_ref().and_then(|d| d.media_time().ok()),
            None => None,
        };
        if let Some(position) = position {
            self.listener.emit(|l| l.now_playing(position));
        }
    }

    pub fn event_sink(self: &Arc<Self>) -> Arc<dyn DecoderEventSink> {
        Arc::new(SessionEvents {
            session: Arc::downgrade(self),
        })
    }

    // ------------------------------------------------------------------------
    // Watchdog
    // ------------------------------------------------------------------------

    pub fn set_watchdog(&self, handle: JoinHandle<()>) {
        *self.watchdog.lock() = Some(handle);
    }

    pub fn has_watchdog(&self) -> bool {
        self.watchdog.lock().is_some()
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stop everything. Idempotent; threads are signalled, not joined.
    pub fn close(&self) {
        {
            let mut player_state = self.player_state.lock();
            if *player_state == PlayerState::Closed {
                return;
            }
            *player_state = PlayerState::Closed;
        }

        self.update(|st| {
            st.activity = Activity::Closing;
            st.generation += 1;
        });

        if let Some(ring) = self.ring() {
            ring.abort_writers();
        }

        if let Some(mut guard) = self.decoder.try_lock() {
            if let Some(decoder) = guard.take() {
                release_decoder(decoder);
            }
        }

        {
            let mut conn = self.connection.lock();
            self.close_connection(&mut conn);
        }

        if let Some(ring) = self.ring() {
            ring.clear();
        }

        self.downloader.lock().take();
        self.watchdog.lock().take();

        info!(session = %self.id, "Session closed");
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> StreamingStats {
        let mut stats = {
            let st = self.state.lock();
            StreamingStats {
                total_downloaded: st.total_downloaded,
                total_buffered: st.total_buffered,
                initial_buffering_complete: st.initial_buffering_complete,
                download_complete: st.download_complete,
                reconnects: st.reconnects,
                discards: st.discards,
                ..Default::default()
            }
        };

        stats.feed_paused = self.feed_paused.load(Ordering::Acquire);
        if let Some(ring) = self.ring() {
            let window = ring.window();
            stats.buffer_starts_at = window.start;
            stats.buffer_ends_at = window.end;
            stats.now = ring.read_offset();
            stats.available = ring.available();
            stats.space_left = ring.space_left();
            stats.capacity = ring.capacity() as u64;
        }
        stats
    }
}

fn release_decoder(mut decoder: Box<dyn MediaDecoder>) {
    if let Err(e) = decoder.stop() {
        debug!(error = %e, "Decoder stop during close failed");
    }
    decoder.close();
}

/// Forwards decoder events to the listener.
struct SessionEvents {
    session: Weak<Session>,
}

impl DecoderEventSink for SessionEvents {
    fn on_event(&self, event: DecoderEvent) {
        let Some(session) = self.session.upgrade() else {
            return;
        };

        session.listener.emit(|l| l.player_update(&event));

        if let DecoderEvent::Error(message) = &event {
            error!(session = %session.id, error = %message, "Decoder failed");
            session.emit_error(StreamingErrorCode::PlayingMedia);
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_fetch_resets_latches_and_bumps_generation() {
        let mut state = SessionState::new();
        state.initial_buffering_complete = true;
        state.download_complete = true;
        state.total_downloaded = 10;
        state.discard = Some(DiscardRecord {
            pending_at_source: 3,
        });

        assert_eq!(state.begin_fetch(Activity::Refetching), Some(1));
        assert!(!state.initial_buffering_complete);
        assert!(!state.download_complete);
        assert_eq!(state.total_downloaded, 0);
        assert!(state.discard.is_none());
        assert!(state.is_current(1));
        assert!(!state.is_current(0));
    }

    #[test]
    fn closing_blocks_new_fetches() {
        let mut state = SessionState::new();
        state.activity = Activity::Closing;

        assert_eq!(state.begin_fetch(Activity::Downloading), None);
        assert!(!state.is_current(0));
    }

    #[test]
    fn seek_gate_serializes_holders() {
        let gate = Arc::new(SeekGate::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let permit = gate.acquire();
        let handle = {
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _permit = gate.acquire();
                order.lock().push("second");
            })
        };

        thread::sleep(Duration::from_millis(30));
        order.lock().push("first");
        drop(permit);
        handle.join().unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }
}
