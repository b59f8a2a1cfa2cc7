//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the streaming engine and
//! platform-specific implementations. Each trait represents a capability the
//! engine requires but that must be provided differently per host.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Blocking range-request streaming
//!
//! ### Media
//! - [`PullSource`](playback::PullSource) - Byte feed consumed by a decoder
//! - [`MediaDecoder`](playback::MediaDecoder) - Host decoder driven through the playback lifecycle
//! - [`DecoderEventSink`](playback::DecoderEventSink) - Decoder event callback
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The engine fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! let http_client = builder.http_client
//!     .ok_or_else(|| StreamingError::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "HTTP locators need an HttpClient. \
//!                  Desktop: use bridge_desktop::ReqwestHttpClient.".to_string()
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and include context such as URLs or status codes.
//!
//! ## Thread Safety
//!
//! The engine runs its producer and watchdog on dedicated threads, so every
//! shared bridge trait requires `Send + Sync`.

pub mod error;
pub mod http;
pub mod playback;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy, StreamResponse};
pub use playback::{
    DecoderEvent, DecoderEventSink, MediaDecoder, PlaybackSessionId, PullSource, ReadOutcome,
    SeekType,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
