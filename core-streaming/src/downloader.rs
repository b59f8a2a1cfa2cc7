//! Producer loop pulling the active connection into the ring buffer.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::config::DOWNLOAD_CHUNK_BYTES;
use crate::connection::SharedSource;
use crate::error::{StreamingError, StreamingErrorCode};
use crate::ring_buffer::{RingBufferError, RingWriter};
use crate::session::{Activity, Session};

/// Counters after a committed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkProgress {
    pub total_downloaded: u64,
    /// This chunk completed initial buffering.
    pub initial_completed: bool,
}

/// Body of a downloader thread. Returns once `generation` is retired, the
/// source is exhausted, or the source fails.
pub(crate) fn run(session: Arc<Session>, generation: u64, source: SharedSource, writer: RingWriter) {
    let span = info_span!("downloader", session = %session.id, generation);
    let _enter = span.enter();

    let mut chunk = vec![0u8; DOWNLOAD_CHUNK_BYTES];

    loop {
        if !session.is_current(generation) {
            debug!("Downloader retired");
            return;
        }

        let read = source.lock().read(&mut chunk);

        match read {
            Ok(0) => {
                session.finish_download(generation);
                return;
            }
            Ok(n) => {
                let raw = &chunk[..n];
                let processed = session.listener.preprocess(raw);
                let data = processed.as_deref().unwrap_or(raw);

                match writer.write_chunk(data, n as u64) {
                    Ok(written) => session.chunk_written(generation, n as u64, written as u64),
                    Err(RingBufferError::Aborted) => {
                        debug!("Write aborted");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "Chunk cannot be buffered");
                        session.emit_error(StreamingErrorCode::Downloading);
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                session.download_failed(generation, e);
                return;
            }
        }
    }
}

impl Session {
    /// Count a committed chunk. `None` once `generation` is stale.
    pub(crate) fn record_chunk(&self, generation: u64, raw_len: u64, written_len: u64) -> Option<ChunkProgress> {
        let initial_bytes = self.config.read().initial_buffer_bytes;

        self.update(|st| {
            if !st.is_current(generation) {
                return None;
            }
            st.total_downloaded += raw_len;
            st.total_buffered += written_len;

            let initial_completed =
                !st.initial_buffering_complete && st.total_downloaded >= initial_bytes;
            if initial_completed {
                st.initial_buffering_complete = true;
            }

            Some(ChunkProgress {
                total_downloaded: st.total_downloaded,
                initial_completed,
            })
        })
    }

    fn chunk_written(&self, generation: u64, raw_len: u64, written_len: u64) {
        let Some(progress) = self.record_chunk(generation, raw_len, written_len) else {
            return;
        };

        trace!(total = progress.total_downloaded, "Chunk buffered");
        self.emit_window();
        self.listener
            .emit(|l| l.download_status_updated(progress.total_downloaded));

        if progress.initial_completed {
            self.emit_initial_buffer_completed();
        }
    }

    fn emit_initial_buffer_completed(&self) {
        let available = self.ring().map(|ring| ring.available()).unwrap_or(0);
        info!(available, "Initial buffering complete");
        self.listener.emit(|l| l.initial_buffer_completed(available));
    }

    fn finish_download(&self, generation: u64) {
        let latched_initial = self.update(|st| {
            if !st.is_current(generation) {
                return None;
            }
            st.download_complete = true;
            st.activity = Activity::Idle;
            let latched = !st.initial_buffering_complete;
            st.initial_buffering_complete = true;
            Some(latched)
        });

        match latched_initial {
            Some(latched) => {
                info!("Download complete");
                if latched {
                    self.emit_initial_buffer_completed();
                }
            }
            None => debug!("Stale downloader reached end of stream"),
        }
    }

    fn download_failed(self: &Arc<Self>, generation: u64, error: std::io::Error) {
        let error = StreamingError::Download(error.to_string());
        let reconnect = self.update(|st| {
            let current = st.is_current(generation);
            let reconnect = current && !st.user_seek && st.activity == Activity::Downloading;
            if reconnect {
                st.discard = None;
            } else if current {
                st.activity = Activity::Idle;
            }
            reconnect
        });

        if !reconnect {
            debug!(error = %error, "Download interrupted by teardown");
            return;
        }

        warn!(error = %error, "Download failed");
        if let Some(code) = error.error_code() {
            self.emit_error(code);
        }
        self.reconnect(generation);
    }
}
