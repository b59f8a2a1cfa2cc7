//! # Streaming Player
//!
//! Facade over a streaming session: builds the connection, drives the host
//! decoder through its lifecycle and exposes buffer controls.
//!
//! ## Lifecycle
//!
//! ```text
//! Unrealized --realize--> Realized --prefetch--> Prefetched --start--> Started
//!                            ^                       |  ^                 |
//!                            +-----deallocate--------+  +------stop-------+
//!
//! any state --close--> Closed
//! ```
//!
//! `start` chains the missing steps from any non-terminal state.
//!
//! ## Usage
//!
//! ```ignore
//! use core_streaming::{StreamingConfig, StreamingPlayer};
//! use std::sync::Arc;
//!
//! let player = StreamingPlayer::builder()
//!     .locator("https://example.com/track.mp3")
//!     .http_client(Arc::new(my_client))
//!     .decoder(Box::new(my_decoder))
//!     .config(StreamingConfig::default())
//!     .build()?;
//!
//! player.start()?;
//! ```

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::HttpClient;
use bridge_traits::playback::{MediaDecoder, PlaybackSessionId, PullSource};
use bridge_traits::time::{Clock, SystemClock};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{clamp_restart_threshold, PlayerState, StreamingConfig, StreamingStats};
use crate::connection::ConnectionManager;
use crate::error::{Result, StreamingError, StreamingErrorCode};
use crate::feed::FeedReader;
use crate::listener::{ListenerSlot, StreamingListener};
use crate::locator::{ConnectionKind, Locator};
use crate::ring_buffer::grown_capacity;
use crate::session::Session;
use crate::watchdog;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`StreamingPlayer`].
///
/// Exactly one of [`locator`](Self::locator) and
/// [`raw_stream`](Self::raw_stream) must be set. `build` fails fast on a
/// malformed locator or a missing capability.
#[derive(Default)]
pub struct StreamingPlayerBuilder {
    locator: Option<String>,
    raw: Option<Box<dyn Read + Send>>,
    content_type: Option<String>,
    decoder: Option<Box<dyn MediaDecoder>>,
    http_client: Option<Arc<dyn HttpClient>>,
    config: StreamingConfig,
    clock: Option<Arc<dyn Clock>>,
    listener: Option<Arc<dyn StreamingListener>>,
}

impl StreamingPlayerBuilder {
    /// Stream from an `http://`, `https://` or `file:///` locator.
    pub fn locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    /// Stream from an already-open byte stream. Requires a content type.
    pub fn raw_stream(mut self, stream: Box<dyn Read + Send>) -> Self {
        self.raw = Some(stream);
        self
    }

    /// Content type handed to the decoder, overriding what the server reports.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn decoder(mut self, decoder: Box<dyn MediaDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for stale-connection detection. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StreamingListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<StreamingPlayer> {
        let (locator, raw) = match (self.locator, self.raw) {
            (Some(locator), None) => (Locator::parse(locator)?, None),
            (None, Some(raw)) => {
                if self.content_type.is_none() {
                    return Err(StreamingError::InvalidArgument(
                        "a raw stream requires a content type. Use .content_type() to set it."
                            .to_string(),
                    ));
                }
                (Locator::raw(), Some(raw))
            }
            (Some(_), Some(_)) => {
                return Err(StreamingError::InvalidArgument(
                    "set either a locator or a raw stream, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(StreamingError::InvalidArgument(
                    "a locator or raw stream is required. Use .locator() to set it.".to_string(),
                ))
            }
        };

        let http_client = match (locator.kind(), self.http_client) {
            (kind, None) if kind.is_http() => Some(provide_default_http_client()?),
            (_, client) => client,
        };

        let decoder = self.decoder.ok_or_else(|| StreamingError::CapabilityMissing {
            capability: "MediaDecoder".to_string(),
            message: "A MediaDecoder is required to play the stream. \
                     Inject the host decoder with .decoder()."
                .to_string(),
        })?;

        let mut config = self.config;
        config.restart_threshold_bytes = clamp_restart_threshold(config.restart_threshold_bytes);
        config.validate().map_err(StreamingError::Config)?;
        if !config.leak_can_resume_feed() {
            warn!(
                buffer_leak_bytes = config.buffer_leak_bytes,
                restart_threshold_bytes = config.restart_threshold_bytes,
                "Leak size does not exceed the restart threshold; a paused feed may need several discards"
            );
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let connection = ConnectionManager::new(locator, http_client, raw, self.content_type);
        let session = Session::new(
            config,
            connection,
            decoder,
            ListenerSlot::new(self.listener),
            clock,
        );

        debug!(session = %session.id, kind = %session.kind, "Streaming player created");

        Ok(StreamingPlayer {
            inner: Arc::new(session),
            lifecycle: Mutex::new(()),
        })
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> StreamingError {
    StreamingError::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for http(s) locators. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject a platform client with .http_client()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

// ============================================================================
// Player
// ============================================================================

/// Progressive-download player for one media source.
///
/// All methods take `&self`; the player may be shared across threads. Dropping
/// it closes the session.
pub struct StreamingPlayer {
    inner: Arc<Session>,
    /// Serializes lifecycle transitions. `close` never takes it.
    lifecycle: Mutex<()>,
}

impl StreamingPlayer {
    pub fn builder() -> StreamingPlayerBuilder {
        StreamingPlayerBuilder::default()
    }

    pub fn session_id(&self) -> PlaybackSessionId {
        self.inner.id
    }

    pub fn state(&self) -> PlayerState {
        self.inner.player_state()
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.inner.kind
    }

    /// Decoder-facing feed of this session.
    pub fn feed(&self) -> FeedReader {
        FeedReader::new(&self.inner)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open the source, start downloading and bind the decoder.
    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn realize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.realize_locked()
    }

    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn prefetch(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.prefetch_locked()
    }

    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        match self.state() {
            PlayerState::Closed => {
                return Err(StreamingError::invalid_state("start", PlayerState::Closed))
            }
            PlayerState::Started => return Ok(()),
            PlayerState::Unrealized | PlayerState::Realized => self.prefetch_locked()?,
            PlayerState::Prefetched => {}
        }

        self.drive_decoder("start", |decoder| decoder.start())?;
        self.transition("start", PlayerState::Started)?;

        if !self.inner.has_watchdog() {
            let handle = watchdog::spawn(&self.inner)?;
            self.inner.set_watchdog(handle);
        }

        let content_length = self.inner.connection.lock().content_length();
        self.inner
            .listener
            .emit(|l| l.content_length_updated(content_length));

        info!("Playback started");
        Ok(())
    }

    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        match self.state() {
            PlayerState::Closed => Err(StreamingError::invalid_state("stop", PlayerState::Closed)),
            PlayerState::Started => {
                self.drive_decoder("stop", |decoder| decoder.stop())?;
                self.transition("stop", PlayerState::Prefetched)
            }
            _ => Ok(()),
        }
    }

    /// Release decoder resources acquired by `prefetch`.
    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn deallocate(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        match self.state() {
            PlayerState::Closed => Err(StreamingError::invalid_state(
                "deallocate",
                PlayerState::Closed,
            )),
            PlayerState::Prefetched => {
                self.drive_decoder("deallocate", |decoder| decoder.deallocate())?;
                self.transition("deallocate", PlayerState::Realized)
            }
            _ => Ok(()),
        }
    }

    /// Tear the session down. Safe from any state and idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    fn realize_locked(&self) -> Result<()> {
        match self.state() {
            PlayerState::Closed => {
                return Err(StreamingError::invalid_state(
                    "realize",
                    PlayerState::Closed,
                ))
            }
            PlayerState::Unrealized => {}
            _ => return Ok(()),
        }

        self.inner
            .config
            .read()
            .validate()
            .map_err(StreamingError::Config)?;

        info!(locator = %self.inner.connection.lock().locator(), "Realizing");
        self.inner.open_stream()?;

        let feed = FeedReader::new(&self.inner);
        let content_type = feed.content_type();
        let source: Arc<dyn PullSource> = Arc::new(feed);
        let events = self.inner.event_sink();

        self.drive_decoder("realize", |decoder| {
            decoder.open(source, &content_type, events)
        })?;
        self.transition("realize", PlayerState::Realized)
    }

    fn prefetch_locked(&self) -> Result<()> {
        match self.state() {
            PlayerState::Closed => {
                return Err(StreamingError::invalid_state(
                    "prefetch",
                    PlayerState::Closed,
                ))
            }
            PlayerState::Unrealized => self.realize_locked()?,
            PlayerState::Realized => {}
            PlayerState::Prefetched | PlayerState::Started => return Ok(()),
        }

        self.drive_decoder("prefetch", |decoder| decoder.prefetch())?;
        self.transition("prefetch", PlayerState::Prefetched)
    }

    /// Run a decoder lifecycle call. A decoder failure is fatal to the session.
    fn drive_decoder(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn MediaDecoder) -> BridgeResult<()>,
    ) -> Result<()> {
        let result = self.inner.with_decoder(operation, |decoder| {
            f(decoder).map_err(|e| StreamingError::Playback(e.to_string()))
        });

        if let Err(e @ StreamingError::Playback(_)) = &result {
            error!(operation, error = %e, "Decoder failed");
            self.inner.emit_error(StreamingErrorCode::PlayingMedia);
            self.inner.close();
        }
        result
    }

    fn transition(&self, operation: &'static str, to: PlayerState) -> Result<()> {
        let mut state = self.inner.player_state.lock();
        if *state == PlayerState::Closed {
            return Err(StreamingError::invalid_state(operation, PlayerState::Closed));
        }
        debug!(from = ?*state, to = ?to, "State transition");
        *state = to;
        Ok(())
    }

    fn require_realized(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            state @ (PlayerState::Unrealized | PlayerState::Closed) => {
                Err(StreamingError::invalid_state(operation, state))
            }
            _ => Ok(()),
        }
    }

    fn require_not_unrealized(&self, operation: &'static str) -> Result<()> {
        if self.state() == PlayerState::Unrealized {
            return Err(StreamingError::invalid_state(
                operation,
                PlayerState::Unrealized,
            ));
        }
        Ok(())
    }

    fn require_unrealized(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            PlayerState::Unrealized => Ok(()),
            state => Err(StreamingError::invalid_state(operation, state)),
        }
    }

    // ------------------------------------------------------------------------
    // Positioning
    // ------------------------------------------------------------------------

    /// Seek to a media position through the decoder. Returns the position
    /// the decoder reached.
    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn set_media_time(&self, position: Duration) -> Result<Duration> {
        self.require_realized("set_media_time")?;

        self.inner.user_seek(|| {
            self.inner.with_decoder("set_media_time", |decoder| {
                decoder
                    .set_media_time(position)
                    .map_err(|e| StreamingError::Seek(e.to_string()))
            })
        })
    }

    /// Seek the feed to a byte offset. Returns the offset actually reached.
    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn seek_bytes(&self, offset: u64) -> Result<u64> {
        self.require_realized("seek_bytes")?;

        let target = i64::try_from(offset).unwrap_or(i64::MAX);
        let feed = self.feed();
        Ok(self.inner.user_seek(|| feed.seek(target)))
    }

    pub fn media_time(&self) -> Result<Duration> {
        self.require_not_unrealized("media_time")?;
        self.inner.with_decoder("media_time", |decoder| {
            decoder.media_time().map_err(StreamingError::from)
        })
    }

    pub fn duration(&self) -> Result<Option<Duration>> {
        self.require_not_unrealized("duration")?;
        self.inner
            .with_decoder("duration", |decoder| Ok(decoder.duration()))
    }

    // ------------------------------------------------------------------------
    // Buffer
    // ------------------------------------------------------------------------

    pub fn content_length(&self) -> Result<Option<u64>> {
        self.require_not_unrealized("content_length")?;
        Ok(self.inner.connection.lock().content_length())
    }

    /// Bytes currently held in the buffer window.
    pub fn buffer_content_length(&self) -> Result<u64> {
        self.require_not_unrealized("buffer_content_length")?;
        Ok(self.inner.ring().map(|ring| ring.window().len()).unwrap_or(0))
    }

    /// Grow the buffer by `percent` of its current capacity, keeping its
    /// content. Returns the new capacity.
    #[instrument(skip(self), fields(session = %self.inner.id))]
    pub fn increase_buffer_capacity(&self, percent: i32) -> Result<usize> {
        let percent = u32::try_from(percent).map_err(|_| {
            StreamingError::InvalidArgument(format!(
                "increase factor must be positive, got {}",
                percent
            ))
        })?;

        let _reader = self.inner.reader.lock();
        let _connection = self.inner.connection.lock();

        let capacity = match self.inner.ring() {
            Some(ring) => ring.resize(percent),
            None => grown_capacity(self.inner.config.read().buffer_capacity_bytes, percent),
        }
        .map_err(|e| StreamingError::InvalidArgument(e.to_string()))?;
        self.inner.config.write().buffer_capacity_bytes = capacity;

        info!(percent, capacity, "Buffer capacity increased");
        self.inner.emit_window();
        Ok(capacity)
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    pub fn config(&self) -> StreamingConfig {
        self.inner.config.read().clone()
    }

    pub fn set_initial_buffer(&self, bytes: u64) -> Result<()> {
        self.require_unrealized("set_initial_buffer")?;
        self.inner.config.write().initial_buffer_bytes = bytes;
        Ok(())
    }

    pub fn set_buffer_capacity(&self, bytes: usize) -> Result<()> {
        self.require_unrealized("set_buffer_capacity")?;
        self.inner.config.write().buffer_capacity_bytes = bytes;
        Ok(())
    }

    /// Values below the supported floor are raised to it.
    pub fn set_restart_threshold(&self, bytes: u64) -> Result<()> {
        self.require_unrealized("set_restart_threshold")?;
        self.inner.config.write().restart_threshold_bytes = clamp_restart_threshold(bytes);
        Ok(())
    }

    pub fn set_content_type(&self, content_type: impl Into<String>) -> Result<()> {
        self.require_unrealized("set_content_type")?;
        self.inner
            .connection
            .lock()
            .set_content_type(Some(content_type.into()));
        Ok(())
    }

    /// Takes effect at the next discard.
    pub fn set_buffer_leak_size(&self, bytes: u64) -> Result<()> {
        let capacity = self.inner.config.read().buffer_capacity_bytes as u64;
        if bytes == 0 || bytes > capacity {
            return Err(StreamingError::InvalidArgument(format!(
                "leak size must be in 1..={}, got {}",
                capacity, bytes
            )));
        }
        self.inner.config.write().buffer_leak_bytes = bytes;
        Ok(())
    }

    /// Takes effect at the next watchdog tick.
    pub fn set_connection_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(StreamingError::InvalidArgument(
                "connection timeout must be > 0".to_string(),
            ));
        }
        self.inner.config.write().connection_timeout = timeout;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Listener & introspection
    // ------------------------------------------------------------------------

    /// Register the listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn StreamingListener>) {
        self.inner.listener.set(listener);
    }

    pub fn remove_listener(&self) {
        self.inner.listener.clear();
    }

    pub fn stats(&self) -> StreamingStats {
        self.inner.stats()
    }
}

impl Drop for StreamingPlayer {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for StreamingPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPlayer")
            .field("session", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}
