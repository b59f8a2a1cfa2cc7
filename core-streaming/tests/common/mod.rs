//! Shared fakes for the streaming integration tests.

#![allow(dead_code)]

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, StreamResponse};
use bridge_traits::playback::{DecoderEvent, DecoderEventSink, MediaDecoder, PullSource};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_streaming::{StreamingErrorCode, StreamingEvent, StreamingListener};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Upper bound for any wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Data
// ============================================================================

/// Deterministic payload where every byte identifies its offset.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(pattern_byte).collect()
}

pub fn pattern_byte(offset: usize) -> u8 {
    (offset % 251) as u8
}

/// Repeats every byte twice.
pub fn doubled(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|&b| [b, b]).collect()
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// Listener
// ============================================================================

/// Records every callback in arrival order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<StreamingEvent>>,
    transform: Option<fn(&[u8]) -> Vec<u8>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listener that rewrites every downloaded chunk before it is buffered.
    pub fn with_transform(transform: fn(&[u8]) -> Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            transform: Some(transform),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<StreamingEvent> {
        self.events.lock().clone()
    }

    pub fn initial_completions(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StreamingEvent::InitialBufferCompleted { available } => Some(available),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<StreamingErrorCode> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StreamingEvent::Error { code } => Some(code),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: StreamingEvent) {
        self.events.lock().push(event);
    }
}

impl StreamingListener for RecordingListener {
    fn preprocess_data(&self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.transform.map(|transform| transform(chunk))
    }

    fn initial_buffer_completed(&self, available: u64) {
        self.record(StreamingEvent::InitialBufferCompleted { available });
    }

    fn buffer_status_changed(&self, window_start: u64, length: u64) {
        self.record(StreamingEvent::BufferStatusChanged {
            window_start,
            length,
        });
    }

    fn download_status_updated(&self, total_downloaded: u64) {
        self.record(StreamingEvent::DownloadStatusUpdated { total_downloaded });
    }

    fn feed_paused(&self, available: u64) {
        self.record(StreamingEvent::FeedPaused { available });
    }

    fn feed_restarted(&self, available: u64) {
        self.record(StreamingEvent::FeedRestarted { available });
    }

    fn content_length_updated(&self, content_length: Option<u64>) {
        self.record(StreamingEvent::ContentLengthUpdated { content_length });
    }

    fn now_reading(&self, offset: u64) {
        self.record(StreamingEvent::NowReading { offset });
    }

    fn streaming_error(&self, code: StreamingErrorCode) {
        self.record(StreamingEvent::Error { code });
    }
}

// ============================================================================
// Range server
// ============================================================================

#[derive(Debug, Default)]
struct GateState {
    allowed: u64,
    failed: bool,
    /// A read returned because the response was cancelled.
    released: bool,
}

/// Controls how many bytes a served body may hand out.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
    cancel: CancellationToken,
}

impl Gate {
    fn open() -> Self {
        Self {
            state: Mutex::new(GateState {
                allowed: u64::MAX,
                ..GateState::default()
            }),
            ..Self::default()
        }
    }

    /// Let `bytes` more bytes through.
    pub fn release(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.allowed = state.allowed.saturating_add(bytes);
        self.changed.notify_all();
    }

    pub fn release_all(&self) {
        self.release(u64::MAX);
    }

    /// Make the next read fail.
    pub fn fail(&self) {
        self.state.lock().failed = true;
        self.changed.notify_all();
    }

    /// Whether a reader blocked on this body was let go by cancellation.
    pub fn reader_released(&self) -> bool {
        self.state.lock().released
    }
}

/// Slice for re-checking cancellation while a read waits on its gate.
const GATE_POLL: Duration = Duration::from_millis(10);

/// Response body that serves its bytes only as the gate allows.
struct GatedBody {
    data: Arc<Vec<u8>>,
    position: usize,
    served: u64,
    gate: Arc<Gate>,
}

impl Read for GatedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + TEST_TIMEOUT;
        let mut state = self.gate.state.lock();
        loop {
            if self.gate.cancel.is_cancelled() {
                state.released = true;
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "response cancelled",
                ));
            }
            if state.failed {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by test",
                ));
            }
            if self.position >= self.data.len() {
                return Ok(0);
            }
            if state.allowed > self.served {
                let remaining = self.data.len() - self.position;
                let allowance = (state.allowed - self.served).min(usize::MAX as u64) as usize;
                let n = buf.len().min(remaining).min(allowance);
                buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
                self.position += n;
                self.served += n as u64;
                return Ok(n);
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "gate never opened"));
            }
            self.gate.changed.wait_for(&mut state, GATE_POLL);
        }
    }
}

/// In-memory HTTP server honouring `Range: bytes=N-` requests.
///
/// Every request gets its own [`Gate`]; a gated server starts each gate
/// closed.
pub struct RangeServer {
    data: Arc<Vec<u8>>,
    gated: bool,
    content_type: String,
    requests: Mutex<Vec<u64>>,
    gates: Mutex<Vec<Arc<Gate>>>,
}

impl RangeServer {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Self::build(data, false)
    }

    pub fn gated(data: Vec<u8>) -> Arc<Self> {
        Self::build(data, true)
    }

    fn build(data: Vec<u8>, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            data: Arc::new(data),
            gated,
            content_type: "audio/mpeg".to_string(),
            requests: Mutex::new(Vec::new()),
            gates: Mutex::new(Vec::new()),
        })
    }

    /// Range start of every request so far.
    pub fn requests(&self) -> Vec<u64> {
        self.requests.lock().clone()
    }

    pub fn gate(&self, index: usize) -> Arc<Gate> {
        Arc::clone(&self.gates.lock()[index])
    }

    pub fn wait_for_requests(&self, count: usize) -> bool {
        wait_until(|| self.requests.lock().len() >= count)
    }
}

impl HttpClient for RangeServer {
    fn download_stream(&self, request: HttpRequest) -> BridgeResult<StreamResponse> {
        let offset = request
            .header_value("Range")
            .and_then(|range| range.strip_prefix("bytes="))
            .and_then(|range| range.trim_end_matches('-').parse::<u64>().ok())
            .unwrap_or(0);
        let total = self.data.len() as u64;

        let gate = Arc::new(if self.gated { Gate::default() } else { Gate::open() });
        self.gates.lock().push(Arc::clone(&gate));
        self.requests.lock().push(offset);

        if offset >= total {
            return Ok(StreamResponse::new(416, HashMap::new(), Box::new(io::empty())));
        }

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), self.content_type.clone());
        headers.insert("Content-Length".to_string(), (total - offset).to_string());
        headers.insert(
            "Content-Range".to_string(),
            format!("bytes {}-{}/{}", offset, total - 1, total),
        );

        let cancel = gate.cancel.clone();
        let body = GatedBody {
            data: Arc::clone(&self.data),
            position: offset as usize,
            served: 0,
            gate,
        };
        Ok(StreamResponse::new(206, headers, Box::new(body)).with_cancel(cancel))
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Decoder that only binds the source; the tests read the feed themselves.
///
/// Media time maps one millisecond to one kilobyte of stream.
#[derive(Default)]
pub struct StubDecoder {
    source: Option<Arc<dyn PullSource>>,
    events: Option<Arc<dyn DecoderEventSink>>,
    fail_on_start: bool,
}

impl StubDecoder {
    pub fn boxed() -> Box<dyn MediaDecoder> {
        Box::new(Self::default())
    }

    /// Reports a decoder error event from `start`.
    pub fn failing_on_start() -> Box<dyn MediaDecoder> {
        Box::new(Self {
            fail_on_start: true,
            ..Self::default()
        })
    }
}

impl MediaDecoder for StubDecoder {
    fn open(
        &mut self,
        source: Arc<dyn PullSource>,
        _content_type: &str,
        events: Arc<dyn DecoderEventSink>,
    ) -> BridgeResult<()> {
        self.source = Some(source);
        self.events = Some(events);
        Ok(())
    }

    fn prefetch(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn start(&mut self) -> BridgeResult<()> {
        if self.fail_on_start {
            if let Some(events) = &self.events {
                events.on_event(DecoderEvent::Error("unsupported codec".to_string()));
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn deallocate(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.source = None;
        self.events = None;
    }

    fn media_time(&self) -> BridgeResult<Duration> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| BridgeError::NotAvailable("media time".to_string()))?;
        Ok(Duration::from_millis(source.tell() / 1024))
    }

    fn set_media_time(&mut self, position: Duration) -> BridgeResult<Duration> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| BridgeError::NotAvailable("source".to_string()))?;
        let reached = source.seek(position.as_millis() as i64 * 1024);
        Ok(Duration::from_millis(reached / 1024))
    }

    fn duration(&self) -> Option<Duration> {
        self.source
            .as_ref()
            .and_then(|source| source.content_length())
            .map(|length| Duration::from_millis(length / 1024))
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
