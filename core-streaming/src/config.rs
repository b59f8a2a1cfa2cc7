//! # Streaming Configuration
//!
//! Buffer sizing, flow-control thresholds and reconnect policy, plus the
//! player lifecycle state and statistics snapshot.

use bridge_traits::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StreamingError};
use crate::ring_buffer::MAX_CAPACITY;

/// Bytes pulled from the source per downloader iteration.
pub const DOWNLOAD_CHUNK_BYTES: usize = 1024;

/// Lowest accepted restart threshold.
pub const MIN_RESTART_THRESHOLD_BYTES: u64 = 80_000;

/// Extra bytes that must be buffered beyond a read request before it is
/// served while the download is still running.
pub const READ_GUARD_BYTES: u64 = 3;

/// Period of the watchdog tick.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

/// Streaming engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Size of the ring buffer in bytes.
    ///
    /// Default: 4 MiB.
    #[serde(default = "default_buffer_capacity_bytes")]
    pub buffer_capacity_bytes: usize,

    /// Bytes that must be downloaded before the feed serves its first read.
    ///
    /// Default: 358,000 bytes.
    #[serde(default = "default_initial_buffer_bytes")]
    pub initial_buffer_bytes: u64,

    /// Buffered bytes required before a paused feed resumes.
    ///
    /// Never below [`MIN_RESTART_THRESHOLD_BYTES`]. Default: 128 KiB.
    #[serde(default = "default_restart_threshold_bytes")]
    pub restart_threshold_bytes: u64,

    /// Oldest bytes dropped per reclaim while the feed is paused on a full buffer.
    ///
    /// Default: a third of the default capacity.
    #[serde(default = "default_buffer_leak_bytes")]
    pub buffer_leak_bytes: u64,

    /// How long after a discard the connection may go without delivering
    /// replacement data before it is declared stale.
    ///
    /// Default: 6 seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Pre-roll kept in front of an out-of-buffer seek target.
    ///
    /// `None` means a third of `initial_buffer_bytes`.
    #[serde(default)]
    pub seek_buffer_bytes: Option<u64>,

    /// Open attempts per reconnect before giving up.
    ///
    /// Default: 3.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    /// First backoff delay between reconnect attempts; doubles per attempt.
    ///
    /// Default: 250 ms.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay: Duration,

    /// Upper bound on the reconnect backoff delay.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity_bytes: default_buffer_capacity_bytes(),
            initial_buffer_bytes: default_initial_buffer_bytes(),
            restart_threshold_bytes: default_restart_threshold_bytes(),
            buffer_leak_bytes: default_buffer_leak_bytes(),
            connection_timeout: default_connection_timeout(),
            seek_buffer_bytes: None,
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay: default_reconnect_base_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
        }
    }
}

impl StreamingConfig {
    /// Configuration for memory-constrained hosts.
    ///
    /// - 1 MiB buffer
    /// - Smaller warm-up
    pub fn low_memory() -> Self {
        Self {
            buffer_capacity_bytes: 1024 * 1024,
            initial_buffer_bytes: 160_000,
            restart_threshold_bytes: MIN_RESTART_THRESHOLD_BYTES,
            buffer_leak_bytes: 1024 * 1024 / 3,
            ..Default::default()
        }
    }

    /// Configuration for lossy mobile networks.
    ///
    /// - Larger buffer and warm-up
    /// - Longer stale timeout, more reconnect attempts
    pub fn resilient() -> Self {
        Self {
            buffer_capacity_bytes: 8 * 1024 * 1024,
            initial_buffer_bytes: 716_000,
            restart_threshold_bytes: 262_144,
            buffer_leak_bytes: 8 * 1024 * 1024 / 3,
            connection_timeout: Duration::from_secs(10),
            reconnect_max_attempts: 6,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| StreamingError::Config(format!("invalid JSON: {}", e)))?;
        config.restart_threshold_bytes = clamp_restart_threshold(config.restart_threshold_bytes);
        config.validate().map_err(StreamingError::Config)?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.buffer_capacity_bytes < 2 * DOWNLOAD_CHUNK_BYTES {
            return Err(format!(
                "buffer_capacity_bytes must be at least {}",
                2 * DOWNLOAD_CHUNK_BYTES
            ));
        }

        if self.buffer_capacity_bytes > MAX_CAPACITY {
            return Err(format!("buffer_capacity_bytes must be at most {}", MAX_CAPACITY));
        }

        let capacity = self.buffer_capacity_bytes as u64;

        if self.initial_buffer_bytes > capacity {
            return Err("initial_buffer_bytes cannot exceed buffer_capacity_bytes".to_string());
        }

        // A larger pre-roll would leave the seek target unread after a re-fetch.
        if self.seek_buffer_bytes() > self.initial_buffer_bytes {
            return Err("seek_buffer_bytes cannot exceed initial_buffer_bytes".to_string());
        }

        if self.restart_threshold_bytes < MIN_RESTART_THRESHOLD_BYTES {
            return Err(format!(
                "restart_threshold_bytes must be >= {}",
                MIN_RESTART_THRESHOLD_BYTES
            ));
        }

        if self.restart_threshold_bytes > capacity {
            return Err("restart_threshold_bytes cannot exceed buffer_capacity_bytes".to_string());
        }

        if self.buffer_leak_bytes == 0 || self.buffer_leak_bytes > capacity {
            return Err("buffer_leak_bytes must be in 1..=buffer_capacity_bytes".to_string());
        }

        if self.connection_timeout.is_zero() {
            return Err("connection_timeout must be > 0".to_string());
        }

        if self.reconnect_max_attempts == 0 {
            return Err("reconnect_max_attempts must be > 0".to_string());
        }

        Ok(())
    }

    /// Pre-roll used by out-of-buffer seeks.
    pub fn seek_buffer_bytes(&self) -> u64 {
        self.seek_buffer_bytes
            .unwrap_or(self.initial_buffer_bytes / 3)
    }

    /// Backoff policy applied between reconnect attempts.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            use_exponential_backoff: true,
        }
    }

    /// A paused feed can only resume once more than the restart threshold is
    /// buffered, and only a discard of `buffer_leak_bytes` can make room.
    pub(crate) fn leak_can_resume_feed(&self) -> bool {
        self.buffer_leak_bytes > self.restart_threshold_bytes
    }
}

/// Raise a restart threshold to the supported floor.
pub fn clamp_restart_threshold(bytes: u64) -> u64 {
    bytes.max(MIN_RESTART_THRESHOLD_BYTES)
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_buffer_capacity_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_initial_buffer_bytes() -> u64 {
    358_000
}

fn default_restart_threshold_bytes() -> u64 {
    128 * 1024
}

fn default_buffer_leak_bytes() -> u64 {
    default_buffer_capacity_bytes() as u64 / 3
}

fn default_connection_timeout() -> Duration {
    Duration::from_millis(6000)
}

fn default_reconnect_max_attempts() -> u32 {
    3
}

fn default_reconnect_base_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(5)
}

// ============================================================================
// Player State
// ============================================================================

/// Lifecycle state of a [`StreamingPlayer`](crate::player::StreamingPlayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Unrealized,
    Realized,
    Prefetched,
    Started,
    /// Terminal.
    Closed,
}

impl PlayerState {
    /// Returns `true` once the buffer and connection exist.
    pub fn is_realized(&self) -> bool {
        matches!(self, Self::Realized | Self::Prefetched | Self::Started)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Snapshot of engine counters and buffer geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamingStats {
    /// Raw bytes received from the source in the current fetch session.
    pub total_downloaded: u64,
    /// Bytes written into the ring after preprocessing.
    pub total_buffered: u64,
    /// First stream offset held in the ring.
    pub buffer_starts_at: u64,
    /// One past the last stream offset held in the ring.
    pub buffer_ends_at: u64,
    /// Reader position.
    pub now: u64,
    /// Bytes ready for the reader.
    pub available: u64,
    /// Bytes the downloader may still write without a discard.
    pub space_left: u64,
    pub capacity: u64,
    pub initial_buffering_complete: bool,
    pub download_complete: bool,
    pub feed_paused: bool,
    pub reconnects: u32,
    pub discards: u32,
}

impl StreamingStats {
    /// Fraction of the ring occupied by retained bytes (0.0 to 1.0).
    pub fn buffer_fill(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.buffer_ends_at - self.buffer_starts_at) as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_capacity_bytes, 4_194_304);
        assert_eq!(config.initial_buffer_bytes, 358_000);
        assert_eq!(config.restart_threshold_bytes, 131_072);
        assert_eq!(config.buffer_leak_bytes, 1_398_101);
        assert_eq!(config.connection_timeout, Duration::from_millis(6000));
    }

    #[test]
    fn presets_are_valid() {
        assert!(StreamingConfig::low_memory().validate().is_ok());
        assert!(StreamingConfig::resilient().validate().is_ok());
    }

    #[test]
    fn seek_buffer_defaults_to_third_of_initial_buffer() {
        let mut config = StreamingConfig {
            initial_buffer_bytes: 99_999,
            ..Default::default()
        };
        assert_eq!(config.seek_buffer_bytes(), 33_333);

        config.seek_buffer_bytes = Some(10);
        assert_eq!(config.seek_buffer_bytes(), 10);
    }

    #[test]
    fn validate_rejects_inconsistent_sizes() {
        let config = StreamingConfig {
            initial_buffer_bytes: 5_000_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamingConfig {
            restart_threshold_bytes: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamingConfig {
            buffer_leak_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamingConfig {
            buffer_capacity_bytes: MAX_CAPACITY + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_preroll_beyond_initial_buffer() {
        let mut config = StreamingConfig {
            initial_buffer_bytes: 100_000,
            seek_buffer_bytes: Some(100_000),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.seek_buffer_bytes = Some(100_001);
        assert_eq!(
            config.validate(),
            Err("seek_buffer_bytes cannot exceed initial_buffer_bytes".to_string())
        );
    }

    #[test]
    fn restart_threshold_clamps_to_floor() {
        assert_eq!(clamp_restart_threshold(10), 80_000);
        assert_eq!(clamp_restart_threshold(200_000), 200_000);
    }

    #[test]
    fn json_fills_defaults_and_clamps() {
        let config = StreamingConfig::from_json_str(
            r#"{ "buffer_capacity_bytes": 1048576, "buffer_leak_bytes": 300000, "restart_threshold_bytes": 5 }"#,
        )
        .unwrap();

        assert_eq!(config.buffer_capacity_bytes, 1_048_576);
        assert_eq!(config.restart_threshold_bytes, 80_000);
        assert_eq!(config.initial_buffer_bytes, 358_000);
    }

    #[test]
    fn json_rejects_garbage() {
        assert!(matches!(
            StreamingConfig::from_json_str("{ not json"),
            Err(StreamingError::Config(_))
        ));
    }

    #[test]
    fn reconnect_policy_uses_backoff_settings() {
        let policy = StreamingConfig::default().reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
    }

    #[test]
    fn player_state_helpers() {
        assert!(PlayerState::Started.is_realized());
        assert!(!PlayerState::Unrealized.is_realized());
        assert!(PlayerState::Closed.is_terminal());
    }

    #[test]
    fn stats_buffer_fill() {
        let stats = StreamingStats {
            buffer_starts_at: 100,
            buffer_ends_at: 600,
            capacity: 1000,
            ..Default::default()
        };
        assert!((stats.buffer_fill() - 0.5).abs() < f64::EPSILON);
    }
}
