//! Stream a URL or file through the engine and print buffer statistics.
//!
//! ```text
//! cargo run -p core-streaming --example stream_url --features desktop-shims -- \
//!     https://example.com/track.mp3 [seconds]
//! ```
//!
//! The decoder here only drains bytes; it stands in for a real backend.

use anyhow::{bail, Context, Result};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::playback::{DecoderEvent, DecoderEventSink, MediaDecoder, PullSource, ReadOutcome};
use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_streaming::{StreamingConfig, StreamingPlayer, StreamingStats};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pulls the feed as fast as it fills, counting bytes.
#[derive(Default)]
struct DrainDecoder {
    source: Option<Arc<dyn PullSource>>,
    events: Option<Arc<dyn DecoderEventSink>>,
    running: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl MediaDecoder for DrainDecoder {
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
        let (Some(source), Some(events)) = (self.source.clone(), self.events.clone()) else {
            return Ok(());
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let running = Arc::clone(&self.running);
        let consumed = Arc::clone(&self.consumed);
        self.worker = Some(thread::spawn(move || {
            let mut buf = vec![0u8; 16 * 1024];
            while running.load(Ordering::SeqCst) {
                match source.read(&mut buf) {
                    Ok(ReadOutcome::Read(n)) => {
                        consumed.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        events.on_event(DecoderEvent::EndOfMedia {
                            position: Duration::from_millis(source.tell()),
                        });
                        break;
                    }
                    Err(_) => break,
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> BridgeResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn deallocate(&mut self) -> BridgeResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.source = None;
        self.events = None;
        // The worker exits once the closed feed unblocks its read.
        self.worker.take();
    }

    fn media_time(&self) -> BridgeResult<Duration> {
        Ok(Duration::from_millis(self.consumed.load(Ordering::Relaxed)))
    }

    fn set_media_time(&mut self, position: Duration) -> BridgeResult<Duration> {
        Ok(position)
    }

    fn duration(&self) -> Option<Duration> {
        None
    }
}

fn print_stats(elapsed: Duration, stats: &StreamingStats) {
    println!(
        "{:>5.1}s  downloaded {:>10}  window [{}, {})  fill {:>5.1}%  reconnects {}  discards {}",
        elapsed.as_secs_f64(),
        stats.total_downloaded,
        stats.buffer_starts_at,
        stats.buffer_ends_at,
        stats.buffer_fill() * 100.0,
        stats.reconnects,
        stats.discards,
    );
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(locator) = args.next() else {
        bail!("usage: stream_url <url-or-path> [seconds]");
    };
    let seconds: u64 = match args.next() {
        Some(value) => value.parse().context("seconds must be a whole number")?,
        None => 10,
    };

    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Info),
    )
    .context("failed to initialise logging")?;

    let player = StreamingPlayer::builder()
        .locator(locator)
        .decoder(Box::new(DrainDecoder::default()))
        .config(StreamingConfig::resilient())
        .build()
        .context("failed to build player")?;

    player.start().context("failed to start playback")?;
    println!(
        "{} stream, content length {:?}",
        player.connection_kind(),
        player.content_length()?
    );

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(seconds) {
        thread::sleep(Duration::from_secs(1));
        let stats = player.stats();
        print_stats(started.elapsed(), &stats);
        if stats.download_complete && stats.available == 0 {
            break;
        }
    }

    player.close();
    Ok(())
}
