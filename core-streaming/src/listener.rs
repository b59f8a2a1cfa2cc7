//! # Streaming Listener
//!
//! Single-listener notification contract. Every callback runs synchronously
//! on the thread that produced it (downloader, reader, watchdog or the
//! facade caller), so a listener must return quickly and must not call back
//! into the player's blocking operations.

use bridge_traits::playback::DecoderEvent;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StreamingErrorCode;

/// Receives engine notifications. All methods default to no-ops.
pub trait StreamingListener: Send + Sync {
    /// Initial buffering finished with `available` bytes ready.
    fn initial_buffer_completed(&self, _available: u64) {}

    /// The buffered window now starts at `window_start` and spans `length` bytes.
    fn buffer_status_changed(&self, _window_start: u64, _length: u64) {}

    /// Raw bytes received so far in the current fetch session.
    fn download_status_updated(&self, _total_downloaded: u64) {}

    fn feed_paused(&self, _available: u64) {}

    fn feed_restarted(&self, _available: u64) {}

    fn content_length_updated(&self, _content_length: Option<u64>) {}

    /// Transform a downloaded chunk before it is buffered. `None` keeps the
    /// chunk as is.
    fn preprocess_data(&self, _chunk: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// The reader moved to `offset`.
    fn now_reading(&self, _offset: u64) {}

    /// Decoder playback position.
    fn now_playing(&self, _position: Duration) {}

    fn streaming_error(&self, _code: StreamingErrorCode) {}

    fn player_update(&self, _event: &DecoderEvent) {}
}

/// Holder for the optional registered listener.
///
/// Emitters clone the `Arc` out of the slot before calling, so a listener may
/// be swapped while a callback is running.
#[derive(Default)]
pub struct ListenerSlot {
    listener: RwLock<Option<Arc<dyn StreamingListener>>>,
}

impl ListenerSlot {
    pub fn new(listener: Option<Arc<dyn StreamingListener>>) -> Self {
        Self {
            listener: RwLock::new(listener),
        }
    }

    pub fn set(&self, listener: Arc<dyn StreamingListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear(&self) {
        *self.listener.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.listener.read().is_some()
    }

    /// Run `f` against the current listener, if any.
    pub fn emit(&self, f: impl FnOnce(&dyn StreamingListener)) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            f(listener.as_ref());
        }
    }

    /// Run the preprocess hook, falling back to the raw chunk.
    pub fn preprocess(&self, chunk: &[u8]) -> Option<Vec<u8>> {
        let listener = self.listener.read().clone();
        listener.and_then(|listener| listener.preprocess_data(chunk))
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting {
        paused: Mutex<Vec<u64>>,
    }

    impl StreamingListener for Counting {
        fn feed_paused(&self, available: u64) {
            self.paused.lock().push(available);
        }

        fn preprocess_data(&self, chunk: &[u8]) -> Option<Vec<u8>> {
            Some(chunk.iter().map(|b| b ^ 0xff).collect())
        }
    }

    #[test]
    fn empty_slot_drops_events() {
        let slot = ListenerSlot::default();
        slot.emit(|l| l.feed_paused(1));
        assert!(slot.preprocess(b"ab").is_none());
    }

    #[test]
    fn set_and_remove_listener() {
        let listener = Arc::new(Counting::default());
        let slot = ListenerSlot::new(None);

        slot.set(listener.clone());
        slot.emit(|l| l.feed_paused(7));
        assert_eq!(slot.preprocess(&[0x0f]), Some(vec![0xf0]));

        slot.clear();
        slot.emit(|l| l.feed_paused(8));

        assert_eq!(*listener.paused.lock(), vec![7]);
    }
}
