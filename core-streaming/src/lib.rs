//! # Streaming Engine
//!
//! Progressive-download playback of network and local media.
//!
//! ## Overview
//!
//! A [`StreamingPlayer`] pulls a media source into a fixed-capacity
//! [`RingBuffer`] on a background downloader while a host decoder reads it
//! back through a [`FeedReader`]:
//! - HTTP(S) range requests, local files and raw byte streams
//! - Initial buffering and low-water-mark flow control
//! - Reclaiming the oldest data when a paused reader blocks the downloader
//! - Stale-connection detection with automatic reconnect
//! - Out-of-buffer seeks by re-fetching from a pre-roll before the target
//!
//! Progress is reported through a single [`StreamingListener`]; wrap an
//! [`EventBusListener`] to fan it out to several subscribers.

pub mod config;
pub mod connection;
pub(crate) mod downloader;
pub mod error;
pub mod events;
pub mod feed;
pub mod listener;
pub mod locator;
pub mod player;
pub mod ring_buffer;
pub(crate) mod session;
pub mod watchdog;

pub use config::{PlayerState, StreamingConfig, StreamingStats};
pub use error::{Result, StreamingError, StreamingErrorCode};
pub use events::{EventBusListener, EventStream, StreamingEvent};
pub use feed::{FeedReader, FeedStream};
pub use listener::StreamingListener;
pub use locator::{ConnectionKind, Locator};
pub use player::{StreamingPlayer, StreamingPlayerBuilder};
pub use ring_buffer::{RingBuffer, RingBufferError};
pub use watchdog::{StaleConnectionDetector, Verdict};
