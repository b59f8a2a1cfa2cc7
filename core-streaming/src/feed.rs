//! # Feed Reader
//!
//! Pull interface the decoder reads through. Serves bytes from the ring
//! buffer with two policies on top:
//!
//! - **Flow control**: once the buffer runs low the feed pauses, and resumes
//!   only when more than the restart threshold is buffered again.
//! - **Reclaim**: while paused on a full buffer, the oldest `buffer_leak_bytes`
//!   are discarded so the downloader can continue.
//!
//! Out-of-window seeks re-position a local file in place, re-fetch an HTTP
//! source from a pre-roll before the target, and are refused for raw streams.

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::playback::{PullSource, ReadOutcome, SeekType};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use crate::config::{DOWNLOAD_CHUNK_BYTES, READ_GUARD_BYTES};
use crate::connection::DEFAULT_CONTENT_TYPE;
use crate::error::StreamingErrorCode;
use crate::locator::ConnectionKind;
use crate::ring_buffer::RingBuffer;
use crate::session::{DiscardRecord, Session, SessionState};

enum Step {
    Consume { len: usize, restarted: Option<u64> },
    Pause { available: u64 },
    Discard,
    EndOfStream,
}

/// Decoder-facing view of a streaming session.
///
/// Cheap to clone. Holds the session weakly; once the player is gone every
/// read reports end of stream.
#[derive(Clone)]
pub struct FeedReader {
    session: Weak<Session>,
}

impl FeedReader {
    pub(crate) fn new(session: &Arc<Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
        }
    }

    /// `std::io` adapter over this reader.
    pub fn stream(&self) -> FeedStream {
        FeedStream {
            feed: self.clone(),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }
}

impl std::fmt::Debug for FeedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedReader")
            .field("attached", &(self.session.strong_count() > 0))
            .finish()
    }
}

impl PullSource for FeedReader {
    fn read(&self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        let Some(session) = self.session() else {
            return Ok(ReadOutcome::EndOfStream);
        };
        if buf.is_empty() {
            return Ok(ReadOutcome::Read(0));
        }
        let ring = session
            .ring()
            .ok_or_else(|| BridgeError::NotAvailable("feed read before realize".to_string()))?;

        let _reader = session.reader.lock();

        loop {
            let step = {
                let mut state = session.lock_state();
                match next_step(&session, &state, ring, buf.len()) {
                    Some(step) => step,
                    None => {
                        session.wait_on(&mut state);
                        continue;
                    }
                }
            };

            match step {
                Step::EndOfStream => return Ok(ReadOutcome::EndOfStream),
                Step::Pause { available } => {
                    debug!(available, "Feed paused");
                    session.listener.emit(|l| l.feed_paused(available));
                }
                Step::Discard => discard_oldest(&session, ring),
                Step::Consume { len, restarted } => {
                    if let Some(available) = restarted {
                        debug!(available, "Feed restarted");
                        session.listener.emit(|l| l.feed_restarted(available));
                    }
                    let n = ring.read(&mut buf[..len]);
                    let now = ring.read_offset();
                    trace!(n, now, "Served read");
                    session.emit_now_reading(now);
                    return Ok(ReadOutcome::Read(n));
                }
            }
        }
    }

    fn seek(&self, offset: i64) -> u64 {
        let Some(session) = self.session() else {
            return 0;
        };
        let target = offset.max(0) as u64;

        let _reader = session.reader.lock();
        let Some(ring) = session.ring() else {
            return 0;
        };

        if ring.window().contains(target) && ring.seek_to_offset(target).is_ok() {
            session.emit_now_reading(target);
            return target;
        }

        let result = match session.kind {
            ConnectionKind::File => session.reposition_file(target),
            ConnectionKind::Http | ConnectionKind::Https => {
                let user_seek = session.lock_state().user_seek;
                if user_seek || self.seek_type() == SeekType::RandomAccess {
                    session.refetch_from(target)
                } else {
                    debug!(target, "Out-of-window seek refused");
                    return ring.read_offset();
                }
            }
            ConnectionKind::RawStream => {
                debug!(target, "Raw stream cannot seek outside the buffer");
                return ring.read_offset();
            }
        };

        session.feed_paused.store(false, Ordering::Release);

        match result {
            Ok(reached) => reached,
            Err(e) => {
                warn!(target, error = %e, "Seek failed");
                session.emit_error(StreamingErrorCode::Seeking);
                ring.read_offset()
            }
        }
    }

    fn tell(&self) -> u64 {
        self.session()
            .and_then(|session| session.ring().map(RingBuffer::read_offset))
            .unwrap_or(0)
    }

    fn content_length(&self) -> Option<u64> {
        self.session()
            .and_then(|session| session.connection.lock().content_length())
    }

    fn seek_type(&self) -> SeekType {
        let Some(session) = self.session() else {
            return SeekType::NotSeekable;
        };
        match session.kind {
            ConnectionKind::File => SeekType::RandomAccess,
            ConnectionKind::RawStream => SeekType::NotSeekable,
            ConnectionKind::Http | ConnectionKind::Https => {
                if session.connection.lock().content_length().is_some() {
                    SeekType::RandomAccess
                } else {
                    SeekType::NotSeekable
                }
            }
        }
    }

    fn content_type(&self) -> String {
        self.session()
            .and_then(|session| session.connection.lock().content_type().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }
}

/// Decide what `read` does next. `None` means wait for a state change.
fn next_step(
    session: &Session,
    state: &SessionState,
    ring: &RingBuffer,
    len: usize,
) -> Option<Step> {
    if state.is_closing() {
        return Some(Step::EndOfStream);
    }

    let available = ring.available();
    let paused = session.feed_paused.load(Ordering::Acquire);

    if state.download_complete {
        if available == 0 {
            return Some(Step::EndOfStream);
        }
        let restarted = paused.then(|| {
            session.feed_paused.store(false, Ordering::Release);
            available
        });
        return Some(Step::Consume {
            len: len.min(available as usize),
            restarted,
        });
    }

    if !state.initial_buffering_complete {
        return None;
    }

    if paused {
        let restart_threshold = session.config.read().restart_threshold_bytes;
        if available > restart_threshold {
            session.feed_paused.store(false, Ordering::Release);
            return Some(Step::Consume {
                len: len.min(available as usize),
                restarted: Some(available),
            });
        }
        // A preprocessed chunk can be longer than a source read.
        let needed = ring.blocked_need().max(DOWNLOAD_CHUNK_BYTES as u64 + 1);
        if ring.space_left() < needed {
            return Some(Step::Discard);
        }
        return None;
    }

    if available > len as u64 + READ_GUARD_BYTES {
        return Some(Step::Consume {
            len,
            restarted: None,
        });
    }

    session.feed_paused.store(true, Ordering::Release);
    Some(Step::Pause { available })
}

/// Drop the oldest buffered bytes and record the discard for the watchdog.
fn discard_oldest(session: &Session, ring: &RingBuffer) {
    let outcome = {
        let conn = session.connection.lock();
        let leak = session.config.read().buffer_leak_bytes;
        let pending_at_source = conn.pending();
        let outcome = ring.discard(leak);
        session.update(|st| {
            st.discard = Some(DiscardRecord { pending_at_source });
            st.discards += 1;
        });
        outcome
    };

    debug!(
        discarded = outcome.discarded,
        reader_moved = outcome.reader_moved,
        "Discarded oldest buffered data"
    );
    session.emit_window();
    if outcome.reader_moved {
        session.emit_now_reading(ring.read_offset());
    }
}

// ============================================================================
// std::io adapter
// ============================================================================

/// Blocking [`Read`] + [`Seek`] view of a [`FeedReader`].
#[derive(Debug, Clone)]
pub struct FeedStream {
    feed: FeedReader,
}

impl FeedStream {
    pub fn feed(&self) -> &FeedReader {
        &self.feed
    }
}

impl Read for FeedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match PullSource::read(&self.feed, buf) {
            Ok(outcome) => Ok(outcome.bytes()),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Seek for FeedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.feed.tell() as i128 + delta as i128,
            SeekFrom::End(delta) => {
                let length = self.feed.content_length().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "stream length unknown")
                })?;
                length as i128 + delta as i128
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = target.min(i64::MAX as i128) as i64;
        Ok(PullSource::seek(&self.feed, target))
    }
}

#[cfg(feature = "symphonia")]
impl symphonia::core::io::MediaSource for FeedStream {
    fn is_seekable(&self) -> bool {
        self.feed.seek_type() == SeekType::RandomAccess
    }

    fn byte_len(&self) -> Option<u64> {
        self.feed.content_length()
    }
}
