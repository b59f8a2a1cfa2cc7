//! # Streaming Error Types
//!
//! Error taxonomy for the streaming engine and the numeric codes reported to
//! listeners.

use crate::config::PlayerState;
use crate::ring_buffer::RingBufferError;
use bridge_traits::error::BridgeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while streaming.
#[derive(Error, Debug)]
pub enum StreamingError {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The byte source could not be opened.
    #[error("Failed to open connection: {0}")]
    ConnectionOpen(String),

    /// The byte source failed while downloading. Triggers a reconnect.
    #[error("Download failed: {0}")]
    Download(String),

    // ========================================================================
    // Positioning Errors
    // ========================================================================
    /// A seek could not be served. Playback position is unaffected.
    #[error("Seek failed: {0}")]
    Seek(String),

    // ========================================================================
    // Decoder Errors
    // ========================================================================
    /// The decoder failed; the session is torn down.
    #[error("Playback failed: {0}")]
    Playback(String),

    // ========================================================================
    // Usage Errors
    // ========================================================================
    #[error("Operation `{operation}` is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PlayerState,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Ring buffer error: {0}")]
    Buffer(#[from] RingBufferError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamingError {
    /// Returns `true` if the session survives this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamingError::Download(_) | StreamingError::Seek(_) | StreamingError::Io(_)
        )
    }

    /// Listener code matching this error, for the errors that have one.
    pub fn error_code(&self) -> Option<StreamingErrorCode> {
        match self {
            StreamingError::ConnectionOpen(_) => Some(StreamingErrorCode::OpeningConnection),
            StreamingError::Download(_) => Some(StreamingErrorCode::Downloading),
            StreamingError::Seek(_) => Some(StreamingErrorCode::Seeking),
            StreamingError::Playback(_) => Some(StreamingErrorCode::PlayingMedia),
            _ => None,
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: PlayerState) -> Self {
        StreamingError::InvalidState { operation, state }
    }
}

/// Error codes delivered through `StreamingListener::streaming_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingErrorCode {
    OpeningConnection = 0,
    ClosingConnection = 1,
    Downloading = 2,
    Seeking = 3,
    PlayingMedia = 4,
}

impl StreamingErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_their_wire_values() {
        assert_eq!(StreamingErrorCode::OpeningConnection.as_i32(), 0);
        assert_eq!(StreamingErrorCode::ClosingConnection.as_i32(), 1);
        assert_eq!(StreamingErrorCode::Downloading.as_i32(), 2);
        assert_eq!(StreamingErrorCode::Seeking.as_i32(), 3);
        assert_eq!(StreamingErrorCode::PlayingMedia.as_i32(), 4);
    }

    #[test]
    fn recoverable_errors() {
        assert!(StreamingError::Download("reset".into()).is_recoverable());
        assert!(StreamingError::Seek("gone".into()).is_recoverable());
        assert!(!StreamingError::Playback("codec".into()).is_recoverable());
        assert!(!StreamingError::invalid_state("start", PlayerState::Closed).is_recoverable());
    }

    #[test]
    fn error_codes_map_from_errors() {
        assert_eq!(
            StreamingError::ConnectionOpen("refused".into()).error_code(),
            Some(StreamingErrorCode::OpeningConnection)
        );
        assert_eq!(
            StreamingError::Playback("codec".into()).error_code(),
            Some(StreamingErrorCode::PlayingMedia)
        );
        assert_eq!(StreamingError::InvalidArgument("x".into()).error_code(), None);
    }

    #[test]
    fn download_error_carries_the_io_message() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = StreamingError::Download(io.to_string());
        assert_eq!(err.to_string(), "Download failed: peer reset");
        assert_eq!(err.error_code(), Some(StreamingErrorCode::Downloading));
    }

    #[test]
    fn invalid_state_message_names_operation() {
        let err = StreamingError::invalid_state("set_media_time", PlayerState::Unrealized);
        assert!(err.to_string().contains("set_media_time"));
        assert!(err.to_string().contains("Unrealized"));
    }
}
