//! # Connection Manager
//!
//! Opens, re-opens and closes the byte source behind a stream.
//!
//! - **HTTP(S)**: a `Range: bytes=<offset>-` request through the injected
//!   [`HttpClient`]. `206` is served as is, `200` is fast-forwarded to the
//!   offset, `416` yields an empty source.
//! - **FILE**: a local handle positioned with a seek.
//! - **RAW**: the caller's reader, handed out exactly once.
//!
//! The active source is shared as a [`SharedSource`] so that the downloader
//! can pull from it while the FILE seek path repositions the same handle.
//! Closing never waits on that lock. An HTTP body blocked in a read is cut
//! through the response's cancellation token instead; other sources keep their
//! handle until the read returns.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamingError};
use crate::locator::{ConnectionKind, Locator};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Blocking byte source pulled by the downloader.
pub trait ByteSource: Read + Send {
    /// Reposition the source. Only local files support this.
    fn seek_to(&mut self, _offset: u64) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source cannot seek",
        ))
    }

    /// Bytes readable without blocking, as far as the source can tell.
    fn pending(&self) -> u64 {
        0
    }

    /// Release the underlying handle. Later reads report end of stream.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

// ============================================================================
// Source Implementations
// ============================================================================

struct HttpSource {
    body: Option<Box<dyn Read + Send>>,
}

impl Read for HttpSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.body.as_mut() {
            Some(body) => body.read(buf),
            None => Ok(0),
        }
    }
}

impl ByteSource for HttpSource {
    fn shutdown(&mut self) -> io::Result<()> {
        self.body = None;
        Ok(())
    }
}

struct FileSource {
    file: Option<File>,
    position: u64,
    len: u64,
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let n = file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl ByteSource for FileSource {
    fn seek_to(&mut self, offset: u64) -> io::Result<u64> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file closed"))?;
        self.position = file.seek(SeekFrom::Start(offset.min(self.len)))?;
        Ok(self.position)
    }

    fn pending(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }
}

struct RawSource {
    reader: Option<Box<dyn Read + Send>>,
}

impl Read for RawSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}

impl ByteSource for RawSource {
    fn shutdown(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Source past the end of the resource.
struct EmptySource;

impl Read for EmptySource {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl ByteSource for EmptySource {}

fn share(source: impl ByteSource + 'static) -> SharedSource {
    let source: Box<dyn ByteSource> = Box::new(source);
    Arc::new(Mutex::new(source))
}

// ============================================================================
// Connection Manager
// ============================================================================

/// A freshly opened source.
pub struct OpenedSource {
    pub source: SharedSource,
    /// Stream offset of the first byte the source yields.
    pub offset: u64,
    /// Set when this open discovered the content length.
    pub learned_length: Option<u64>,
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("offset", &self.offset)
            .field("learned_length", &self.learned_length)
            .finish_non_exhaustive()
    }
}

pub struct ConnectionManager {
    locator: Locator,
    http: Option<Arc<dyn HttpClient>>,
    raw: Option<Box<dyn Read + Send>>,
    forced_content_type: Option<String>,
    discovered_content_type: Option<String>,
    content_length: Option<u64>,
    active: Option<SharedSource>,
    /// Aborts the active HTTP body without taking the source lock.
    abort: Option<CancellationToken>,
}

impl ConnectionManager {
    pub fn new(
        locator: Locator,
        http: Option<Arc<dyn HttpClient>>,
        raw: Option<Box<dyn Read + Send>>,
        forced_content_type: Option<String>,
    ) -> Self {
        Self {
            locator,
            http,
            raw,
            forced_content_type,
            discovered_content_type: None,
            content_length: None,
            active: None,
            abort: None,
        }
    }

    pub fn kind(&self) -> ConnectionKind {
        self.locator.kind()
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Forced content type, else the one the server reported.
    pub fn content_type(&self) -> Option<&str> {
        self.forced_content_type
            .as_deref()
            .or(self.discovered_content_type.as_deref())
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.forced_content_type = content_type;
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<SharedSource> {
        self.active.clone()
    }

    /// Pending byte count of the active source, or 0 while it is busy.
    pub fn pending(&self) -> u64 {
        self.active
            .as_ref()
            .and_then(|source| source.try_lock().map(|s| s.pending()))
            .unwrap_or(0)
    }

    /// Open the source so that its first byte is stream offset `offset`.
    pub fn open(&mut self, offset: u64) -> Result<OpenedSource> {
        let known_before = self.content_length.is_some();

        self.abort = None;
        let (source, offset) = match self.locator.kind() {
            ConnectionKind::Http | ConnectionKind::Https => (self.open_http(offset)?, offset),
            ConnectionKind::File => self.open_file(offset)?,
            ConnectionKind::RawStream => (self.open_raw()?, 0),
        };

        self.active = Some(source.clone());

        let learned_length = if known_before {
            None
        } else {
            self.content_length
        };

        info!(
            locator = %self.locator,
            kind = %self.locator.kind(),
            offset,
            content_length = ?self.content_length,
            "Connection opened"
        );

        Ok(OpenedSource {
            source,
            offset,
            learned_length,
        })
    }

    /// Release the active source. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(abort) = self.abort.take() {
            abort.cancel();
        }
        let Some(source) = self.active.take() else {
            return Ok(());
        };

        debug!(locator = %self.locator, "Closing connection");

        let result = match source.try_lock() {
            Some(mut source) => source.shutdown(),
            // The downloader is mid-read; its handle drops when it exits.
            None => Ok(()),
        };
        result
    }

    /// Reposition the active FILE source in place.
    pub fn seek_active(&self, offset: u64) -> Result<u64> {
        let source = self
            .active
            .as_ref()
            .ok_or_else(|| StreamingError::Seek("no open connection".to_string()))?;
        let reached = source.lock().seek_to(offset)?;
        Ok(reached)
    }

    fn open_http(&mut self, offset: u64) -> Result<SharedSource> {
        let client = self
            .http
            .as_ref()
            .ok_or_else(|| StreamingError::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "HTTP locators need an HttpClient".to_string(),
            })?;

        let request = HttpRequest::new(HttpMethod::Get, self.locator.as_str()).range_from(offset);
        let response = client
            .download_stream(request)
            .map_err(|e| StreamingError::ConnectionOpen(e.to_string()))?;

        if response.status == 416 {
            debug!(offset, "Range not satisfiable, treating as end of stream");
            return Ok(share(EmptySource));
        }

        if !response.is_success() {
            return Err(StreamingError::ConnectionOpen(format!(
                "HTTP {} for {}",
                response.status, self.locator
            )));
        }

        if self.discovered_content_type.is_none() {
            self.discovered_content_type = response.content_type().map(str::to_string);
        }

        if self.content_length.is_none() {
            self.content_length = response.content_range_total().or_else(|| {
                response.content_length().map(|len| {
                    if response.status == 206 {
                        len + offset
                    } else {
                        len
                    }
                })
            });
        }

        self.abort = response.cancel.clone();
        let mut body = response.body;
        if response.status != 206 && offset > 0 {
            warn!(offset, "Server ignored the range request, skipping ahead");
            let skipped = io::copy(&mut (&mut body).take(offset), &mut io::sink())?;
            if skipped < offset {
                debug!(skipped, offset, "Resource shorter than resume offset");
            }
        }

        Ok(share(HttpSource { body: Some(body) }))
    }

    fn open_file(&mut self, offset: u64) -> Result<(SharedSource, u64)> {
        let path = self
            .locator
            .file_path()
            .ok_or_else(|| StreamingError::ConnectionOpen("not a file locator".to_string()))?;

        let mut file = File::open(&path)
            .map_err(|e| StreamingError::ConnectionOpen(format!("{}: {}", self.locator, e)))?;
        let len = file.metadata()?.len();
        self.content_length = Some(len);

        let position = if offset > 0 {
            file.seek(SeekFrom::Start(offset.min(len)))?
        } else {
            0
        };

        let source = FileSource {
            file: Some(file),
            position,
            len,
        };
        Ok((share(source), position))
    }

    fn open_raw(&mut self) -> Result<SharedSource> {
        let reader = self.raw.take().ok_or_else(|| {
            StreamingError::ConnectionOpen("raw stream cannot be reopened".to_string())
        })?;
        Ok(share(RawSource {
            reader: Some(reader),
        }))
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("locator", &self.locator)
            .field("content_type", &self.content_type())
            .field("content_length", &self.content_length)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
