//! Source locators and their connection kinds.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, StreamingError};

const HTTP_PREFIX: &str = "http://";
const HTTPS_PREFIX: &str = "https://";
const FILE_PREFIX: &str = "file://";

/// How the engine reaches the bytes of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Http,
    Https,
    File,
    /// Caller-supplied reader; opened once, never re-fetched.
    RawStream,
}

impl ConnectionKind {
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::File => "file",
            Self::RawStream => "raw",
        };
        f.write_str(name)
    }
}

/// A classified source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    value: String,
    kind: ConnectionKind,
}

impl Locator {
    /// Classify a locator string.
    ///
    /// Accepts `http://`, `https://` and `file:///` prefixes in any case.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let lower = value.to_ascii_lowercase();

        let kind = if lower.starts_with(HTTPS_PREFIX) {
            ConnectionKind::Https
        } else if lower.starts_with(HTTP_PREFIX) {
            ConnectionKind::Http
        } else if lower.starts_with("file:///") {
            ConnectionKind::File
        } else {
            return Err(StreamingError::InvalidArgument(format!(
                "unsupported locator: {}",
                core_runtime::logging::redact_locator(&value)
            )));
        };

        Ok(Self { value, kind })
    }

    /// Locator standing in for a caller-supplied stream.
    pub fn raw() -> Self {
        Self {
            value: "raw:".to_string(),
            kind: ConnectionKind::RawStream,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Local path of a `file:///` locator.
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.kind != ConnectionKind::File {
            return None;
        }
        Some(PathBuf::from(&self.value[FILE_PREFIX.len()..]))
    }

    /// Form safe to log.
    pub fn redacted(&self) -> String {
        core_runtime::logging::redact_locator(&self.value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_prefixes_case_insensitively() {
        assert_eq!(
            Locator::parse("HTTP://example.com/a.mp3").unwrap().kind(),
            ConnectionKind::Http
        );
        assert_eq!(
            Locator::parse("https://example.com/a.mp3").unwrap().kind(),
            ConnectionKind::Https
        );
        assert_eq!(
            Locator::parse("File:///tmp/a.mp3").unwrap().kind(),
            ConnectionKind::File
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            Locator::parse("rtsp://example.com/live"),
            Err(StreamingError::InvalidArgument(_))
        ));
        assert!(Locator::parse("file://relative/path").is_err());
        assert!(Locator::parse("").is_err());
    }

    #[test]
    fn file_path_strips_scheme() {
        let locator = Locator::parse("file:///var/media/clip.mp4").unwrap();
        assert_eq!(locator.file_path(), Some(PathBuf::from("/var/media/clip.mp4")));
        assert_eq!(Locator::parse("http://x/y").unwrap().file_path(), None);
    }

    #[test]
    fn display_redacts_tokens() {
        let locator = Locator::parse("https://cdn.example.com/v.mp4?token=secret").unwrap();
        assert!(!locator.to_string().contains("secret"));
    }
}
