//! # Streaming Event Bus
//!
//! Fans listener callbacks out to any number of subscribers over
//! `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ callbacks ┌──────────────────┐ subscribe ┌────────────┐
//! │ Downloader ├──────────>│                  ├──────────>│ UI thread  │
//! └────────────┘           │ EventBusListener │           └────────────┘
//! ┌────────────┐ callbacks │   (broadcast)    │ subscribe ┌────────────┐
//! │ FeedReader ├──────────>│                  ├──────────>│ Telemetry  │
//! └────────────┘           └──────────────────┘           └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_streaming::events::{EventBusListener, StreamingEvent};
//! use core_streaming::listener::StreamingListener;
//!
//! let bus = EventBusListener::new(64);
//! let mut events = bus.subscribe();
//!
//! bus.feed_paused(1024);
//! assert_eq!(events.try_recv().unwrap(), StreamingEvent::FeedPaused { available: 1024 });
//! ```
//!
//! The preprocess hook has no event; a bus listener never transforms data.

use bridge_traits::playback::DecoderEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError, Receiver};

use crate::error::StreamingErrorCode;
use crate::listener::StreamingListener;

/// Default per-subscriber backlog.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// A listener callback captured as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum StreamingEvent {
    InitialBufferCompleted { available: u64 },
    BufferStatusChanged { window_start: u64, length: u64 },
    DownloadStatusUpdated { total_downloaded: u64 },
    FeedPaused { available: u64 },
    FeedRestarted { available: u64 },
    ContentLengthUpdated { content_length: Option<u64> },
    NowReading { offset: u64 },
    NowPlaying { position_ms: u64 },
    Error { code: StreamingErrorCode },
    PlayerUpdate { name: String, detail: String },
}

impl StreamingEvent {
    /// Returns `true` for the high-frequency progress events.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            StreamingEvent::BufferStatusChanged { .. }
                | StreamingEvent::DownloadStatusUpdated { .. }
                | StreamingEvent::NowReading { .. }
                | StreamingEvent::NowPlaying { .. }
        )
    }
}

/// [`StreamingListener`] that republishes every callback on a broadcast channel.
#[derive(Clone)]
pub struct EventBusListener {
    sender: broadcast::Sender<StreamingEvent>,
}

impl EventBusListener {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    /// Slower subscribers receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> Receiver<StreamingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn publish(&self, event: StreamingEvent) {
        // No subscribers is not an error for a fan-out.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBusListener {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBusListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusListener")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl StreamingListener for EventBusListener {
    fn initial_buffer_completed(&self, available: u64) {
        self.publish(StreamingEvent::InitialBufferCompleted { available });
    }

    fn buffer_status_changed(&self, window_start: u64, length: u64) {
        self.publish(StreamingEvent::BufferStatusChanged {
            window_start,
            length,
        });
    }

    fn download_status_updated(&self, total_downloaded: u64) {
        self.publish(StreamingEvent::DownloadStatusUpdated { total_downloaded });
    }

    fn feed_paused(&self, available: u64) {
        self.publish(StreamingEvent::FeedPaused { available });
    }

    fn feed_restarted(&self, available: u64) {
        self.publish(StreamingEvent::FeedRestarted { available });
    }

    fn content_length_updated(&self, content_length: Option<u64>) {
        self.publish(StreamingEvent::ContentLengthUpdated { content_length });
    }

    fn now_reading(&self, offset: u64) {
        self.publish(StreamingEvent::NowReading { offset });
    }

    fn now_playing(&self, position: Duration) {
        self.publish(StreamingEvent::NowPlaying {
            position_ms: position.as_millis() as u64,
        });
    }

    fn streaming_error(&self, code: StreamingErrorCode) {
        self.publish(StreamingEvent::Error { code });
    }

    fn player_update(&self, event: &DecoderEvent) {
        self.publish(StreamingEvent::PlayerUpdate {
            name: event.name().to_string(),
            detail: format!("{:?}", event),
        });
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&StreamingEvent) -> bool + Send + Sync>;

/// Receiver with an optional filter, e.g. to drop progress noise.
pub struct EventStream {
    receiver: Receiver<StreamingEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<StreamingEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StreamingEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Next event passing the filter.
    pub async fn recv(&mut self) -> Result<StreamingEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next queued event passing the filter, without waiting.
    pub fn try_recv(&mut self) -> Option<Result<StreamingEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn accepts(&self, event: &StreamingEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_without_subscribers() {
        let bus = EventBusListener::default();
        bus.feed_restarted(1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBusListener::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.streaming_error(StreamingErrorCode::Seeking);

        let expected = StreamingEvent::Error {
            code: StreamingErrorCode::Seeking,
        };
        assert_eq!(first.try_recv().unwrap(), expected);
        assert_eq!(second.try_recv().unwrap(), expected);
    }

    #[test]
    fn filter_drops_progress_events() {
        let bus = EventBusListener::new(8);
        let mut stream = EventStream::new(bus.subscribe()).filter(|e| !e.is_progress());

        bus.download_status_updated(10);
        bus.now_reading(5);
        bus.initial_buffer_completed(10);

        assert_eq!(
            stream.try_recv().unwrap().unwrap(),
            StreamingEvent::InitialBufferCompleted { available: 10 }
        );
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn lagging_subscriber_is_told() {
        let bus = EventBusListener::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for offset in 0..5 {
            bus.now_reading(offset);
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(3)))));
    }

    #[test]
    fn decoder_updates_carry_the_event_name() {
        let bus = EventBusListener::new(4);
        let mut events = bus.subscribe();

        bus.player_update(&DecoderEvent::EndOfMedia {
            position: Duration::from_secs(3),
        });

        match events.try_recv().unwrap() {
            StreamingEvent::PlayerUpdate { name, .. } => assert_eq!(name, "endOfMedia"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_string(&StreamingEvent::FeedPaused { available: 3 }).unwrap();
        assert_eq!(json, r#"{"event":"FeedPaused","available":3}"#);
    }
}
