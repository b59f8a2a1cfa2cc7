//! Clock and log-forwarding abstractions.
//!
//! The watchdog reads time through [`Clock`] so stale-connection tests can
//! drive it by hand; hosts receive engine logs through [`LoggerSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Injectable time source.
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn idle_for(clock: &dyn Clock, last_progress_ms: i64) -> i64 {
///     clock.unix_timestamp_millis() - last_progress_ms
/// }
/// ```
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch.
    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One log event as handed to a [`LoggerSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path of the emitter, e.g. `core_streaming::downloader`.
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Innermost span active when the event fired.
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn in_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Host-side receiver for engine logs.
///
/// Called synchronously on the emitting thread, which may be a downloader or
/// watchdog thread. Implementations must not call back into the engine.
pub trait LoggerSink: Send + Sync {
    fn log(&self, entry: LogEntry) -> Result<()>;

    /// Entries below this level are dropped before formatting.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}
