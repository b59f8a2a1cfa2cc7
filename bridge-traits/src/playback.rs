//! Playback bridge traits shared by the streaming engine and decoder backends.
//!
//! The engine never decodes media itself. A host-provided [`MediaDecoder`]
//! pulls bytes through a [`PullSource`] and reports its own lifecycle through
//! a [`DecoderEventSink`].

use crate::error::{BridgeError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a pull-based read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the caller's buffer; `n` is never zero for a
    /// non-empty buffer.
    Read(usize),
    /// No bytes remain and none will arrive.
    EndOfStream,
}

impl ReadOutcome {
    /// Bytes delivered, treating end of stream as zero.
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Read(n) => *n,
            ReadOutcome::EndOfStream => 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

/// Seek capability advertised by a pull source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekType {
    RandomAccess,
    NotSeekable,
}

/// Byte source consumed by a decoder.
///
/// All methods take `&self`; implementations serialize access internally so a
/// decoder may read from one thread while a host seeks from another.
pub trait PullSource: Send + Sync {
    /// Fill `buf` with the next bytes of the stream, blocking until data is
    /// available, the stream ends, or the source is shut down.
    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Reposition the read cursor. Negative targets clamp to zero. Returns the
    /// position actually reached, which may differ from the target when the
    /// source cannot serve it.
    fn seek(&self, offset: i64) -> u64;

    /// Current read position.
    fn tell(&self) -> u64;

    /// Total length in bytes, when known.
    fn content_length(&self) -> Option<u64>;

    fn seek_type(&self) -> SeekType;

    /// MIME type of the payload.
    fn content_type(&self) -> String;
}

/// Events a decoder reports about its own lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Started { position: Duration },
    Stopped { position: Duration },
    EndOfMedia { position: Duration },
    DurationUpdated(Option<Duration>),
    /// Unrecoverable decoder failure; the session is torn down.
    Error(String),
    /// Backend-specific event passed through untouched.
    Other { name: String, data: String },
}

impl DecoderEvent {
    pub fn name(&self) -> &str {
        match self {
            DecoderEvent::Started { .. } => "started",
            DecoderEvent::Stopped { .. } => "stopped",
            DecoderEvent::EndOfMedia { .. } => "endOfMedia",
            DecoderEvent::DurationUpdated(_) => "durationUpdated",
            DecoderEvent::Error(_) => "error",
            DecoderEvent::Other { name, .. } => name,
        }
    }
}

/// Receiver for [`DecoderEvent`]s. Decoders may call it from any thread.
pub trait DecoderEventSink: Send + Sync {
    fn on_event(&self, event: DecoderEvent);
}

/// Host decoder driven by the streaming facade.
///
/// Methods mirror the progressive-playback lifecycle: `open` (realize),
/// `prefetch`, `start`, `stop`, `deallocate`, `close`.
pub trait MediaDecoder: Send {
    /// Bind the decoder to its data source.
    fn open(
        &mut self,
        source: Arc<dyn PullSource>,
        content_type: &str,
        events: Arc<dyn DecoderEventSink>,
    ) -> Result<()>;

    /// Acquire scarce resources and prime internal buffers.
    fn prefetch(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Release resources acquired by `prefetch`.
    fn deallocate(&mut self) -> Result<()>;

    /// Release everything. Called at most once.
    fn close(&mut self);

    /// Current media position. Returns [`BridgeError::NotAvailable`] while the
    /// decoder cannot report one yet.
    fn media_time(&self) -> Result<Duration>;

    /// Seek to a media position, returning the position reached.
    fn set_media_time(&mut self, position: Duration) -> Result<Duration>;

    /// Total media duration, when known.
    fn duration(&self) -> Option<Duration>;
}

/// Unique identifier for a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackSessionId(Uuid);

impl PlaybackSessionId {
    /// Generate a new session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Construct an identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shorthand for a decoder reporting that it has no position yet.
pub fn not_ready(what: &str) -> BridgeError {
    BridgeError::NotAvailable(format!("{} not ready", what))
}

/// Convenience result type alias for playback operations.
pub type PlaybackResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_outcome_bytes() {
        assert_eq!(ReadOutcome::Read(12).bytes(), 12);
        assert_eq!(ReadOutcome::EndOfStream.bytes(), 0);
        assert!(ReadOutcome::EndOfStream.is_end_of_stream());
    }

    #[test]
    fn decoder_event_names() {
        assert_eq!(DecoderEvent::Error("boom".into()).name(), "error");
        let other = DecoderEvent::Other {
            name: "bufferingStarted".into(),
            data: String::new(),
        };
        assert_eq!(other.name(), "bufferingStarted");
    }

    #[test]
    fn session_ids_are_unique() {
        let a = PlaybackSessionId::new();
        let b = PlaybackSessionId::default();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn not_ready_is_not_available() {
        assert!(matches!(not_ready("media time"), BridgeError::NotAvailable(_)));
    }
}
