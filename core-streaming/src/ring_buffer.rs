//! # Byte Ring Buffer
//!
//! Fixed-capacity circular byte store shared between the downloader (writer)
//! and the feed reader.
//!
//! ## Design
//!
//! - **Positions**: `mark`, `read` and `write` are logical `u64` cursors
//!   relative to `base`, the stream offset of logical position 0. The physical
//!   index of a position is `pos % capacity`.
//! - **Window**: the stream range `[base + mark, base + write)` is retained.
//!   Bytes behind the read cursor stay in the window until a discard moves the
//!   mark, so in-window seeks backwards are free.
//! - **Backpressure**: writes block while `write - mark` would exceed the
//!   capacity. Only a discard, a rebase or a resize frees room. The length of
//!   the chunk a writer is blocked on is published as
//!   [`RingBuffer::blocked_need`] so the reader knows how much room to free.
//! - **Source cursor**: each write also advances `source_end`, the source
//!   offset the next downloaded byte will come from. It moves in the same
//!   critical section as the data, whatever length preprocessing produced.
//! - **Abort**: [`RingBuffer::abort_writers`] bumps an epoch. A
//!   [`RingWriter`] created under an older epoch fails with
//!   [`RingBufferError::Aborted`], including one blocked on a full buffer.
//!
//! ## Usage
//!
//! ```rust
//! use core_streaming::ring_buffer::RingBuffer;
//!
//! let ring = RingBuffer::new(8);
//! let writer = ring.writer();
//! writer.write(b"abcdef").unwrap();
//!
//! let mut out = [0u8; 4];
//! assert_eq!(ring.read(&mut out), 4);
//! assert_eq!(&out, b"abcd");
//! assert_eq!(ring.space_left(), 2);
//! ```

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on a single blocked-writer wait before re-checking the epoch.
const WRITER_WAIT: Duration = Duration::from_millis(100);

/// Largest capacity a ring may be created with or grown to.
pub const MAX_CAPACITY: usize = 1 << 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingBufferError {
    /// The writer's epoch was retired by a teardown.
    #[error("writer aborted")]
    Aborted,

    #[error("chunk of {len} bytes exceeds ring capacity {capacity}")]
    ChunkTooLarge { len: usize, capacity: usize },

    #[error("offset {offset} outside buffered window [{start}, {end}]")]
    OutOfWindow { offset: u64, start: u64, end: u64 },

    #[error("cannot allocate a ring of {requested} bytes")]
    CapacityUnavailable { requested: u64 },
}

/// Capacity after growing `capacity` by `percent`, bounded by [`MAX_CAPACITY`].
pub fn grown_capacity(capacity: usize, percent: u32) -> Result<usize, RingBufferError> {
    let grown = capacity as u128 + capacity as u128 * u128::from(percent) / 100;
    match usize::try_from(grown) {
        Ok(grown) if grown <= MAX_CAPACITY => Ok(grown),
        _ => Err(RingBufferError::CapacityUnavailable {
            requested: u64::try_from(grown).unwrap_or(u64::MAX),
        }),
    }
}

/// Stream offsets currently held by the ring, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Seek targets are accepted up to and including `end`.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset <= self.end
    }
}

/// Result of [`RingBuffer::discard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardOutcome {
    pub discarded: u64,
    /// The discard overtook the read cursor and dragged it forward.
    pub reader_moved: bool,
}

#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingBufferInner>,
}

struct RingBufferInner {
    state: Mutex<RingState>,
    space: Condvar,
}

struct RingState {
    data: Vec<u8>,
    base: u64,
    mark: u64,
    read: u64,
    write: u64,
    epoch: u64,
    source_end: u64,
    /// Length of the chunk a writer is waiting to commit, 0 when none is.
    blocked_need: u64,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn space_left(&self) -> u64 {
        self.capacity() as u64 - (self.write - self.mark)
    }

    fn copy_in(&mut self, bytes: &[u8]) {
        let capacity = self.capacity();
        let start = (self.write % capacity as u64) as usize;
        let first = bytes.len().min(capacity - start);
        self.data[start..start + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.write += bytes.len() as u64;
    }

    fn copy_out(&mut self, out: &mut [u8]) -> usize {
        let capacity = self.capacity();
        let n = out.len().min((self.write - self.read) as usize);
        let start = (self.read % capacity as u64) as usize;
        let first = n.min(capacity - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..n].copy_from_slice(&self.data[..n - first]);
        self.read += n as u64;
        n
    }
}

impl RingBuffer {
    /// Create an empty ring of `capacity` bytes whose window starts at offset 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RingBufferInner {
                state: Mutex::new(RingState {
                    data: vec![0; capacity.max(1)],
                    base: 0,
                    mark: 0,
                    read: 0,
                    write: 0,
                    epoch: 0,
                    source_end: 0,
                    blocked_need: 0,
                }),
                space: Condvar::new(),
            }),
        }
    }

    /// Writer handle bound to the current epoch.
    pub fn writer(&self) -> RingWriter {
        RingWriter {
            ring: self.clone(),
            epoch: self.inner.state.lock().epoch,
        }
    }

    /// Copy up to `out.len()` bytes from the read cursor forward.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.inner.state.lock().copy_out(out)
    }

    /// Bytes between the read and write cursors.
    pub fn available(&self) -> u64 {
        let state = self.inner.state.lock();
        state.write - state.read
    }

    /// Bytes the writer may add before blocking.
    pub fn space_left(&self) -> u64 {
        self.inner.state.lock().space_left()
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity()
    }

    /// Bytes between the mark and the write cursor.
    pub fn retained(&self) -> u64 {
        let state = self.inner.state.lock();
        state.write - state.mark
    }

    pub fn window(&self) -> Window {
        let state = self.inner.state.lock();
        Window {
            start: state.base + state.mark,
            end: state.base + state.write,
        }
    }

    /// Room a blocked writer is waiting for, 0 when no writer is blocked.
    pub fn blocked_need(&self) -> u64 {
        self.inner.state.lock().blocked_need
    }

    /// Source offset following the last committed write.
    pub fn source_end(&self) -> u64 {
        self.inner.state.lock().source_end
    }

    /// Stream offset of the read cursor.
    pub fn read_offset(&self) -> u64 {
        let state = self.inner.state.lock();
        state.base + state.read
    }

    /// Move the read cursor back to the mark.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.read = state.mark;
    }

    /// Advance the read cursor by up to `n` bytes without copying. Returns
    /// the distance actually moved.
    pub fn skip(&self, n: u64) -> u64 {
        let mut state = self.inner.state.lock();
        let moved = n.min(state.write - state.read);
        state.read += moved;
        moved
    }

    /// Position the read cursor at a stream offset inside the window.
    pub fn seek_to_offset(&self, offset: u64) -> Result<(), RingBufferError> {
        let mut state = self.inner.state.lock();
        let start = state.base + state.mark;
        let end = state.base + state.write;
        if offset < start || offset > end {
            return Err(RingBufferError::OutOfWindow { offset, start, end });
        }
        state.read = offset - state.base;
        Ok(())
    }

    /// Drop up to `leak` of the oldest retained bytes.
    ///
    /// Resets to the mark, skips `leak`, re-marks, then skips back to where
    /// the reader was. A reader the discard overtook is left at the new start.
    pub fn discard(&self, leak: u64) -> DiscardOutcome {
        let mut state = self.inner.state.lock();
        let now = state.read;
        let old_mark = state.mark;

        state.read = state.mark;
        state.read += leak.min(state.write - state.read);
        state.mark = state.read;
        state.read = now.max(state.mark);

        let outcome = DiscardOutcome {
            discarded: state.mark - old_mark,
            reader_moved: state.read != now,
        };
        drop(state);

        self.inner.space.notify_all();
        outcome
    }

    /// Grow the capacity by `percent`, keeping every retained byte. Returns the
    /// new capacity, or an error leaving the ring untouched when the grown
    /// store cannot be allocated.
    pub fn resize(&self, percent: u32) -> Result<usize, RingBufferError> {
        let mut state = self.inner.state.lock();
        let old_capacity = state.capacity();
        let grown = grown_capacity(old_capacity, percent)?;
        if grown == old_capacity {
            return Ok(old_capacity);
        }

        let mut data = Vec::new();
        data.try_reserve_exact(grown)
            .map_err(|_| RingBufferError::CapacityUnavailable {
                requested: grown as u64,
            })?;
        data.resize(grown, 0);
        for pos in state.mark..state.write {
            data[(pos % grown as u64) as usize] = state.data[(pos % old_capacity as u64) as usize];
        }
        state.data = data;
        drop(state);

        self.inner.space.notify_all();
        Ok(grown)
    }

    /// Empty the ring and re-base its window at `offset`. Retires every
    /// outstanding writer.
    pub fn reset_to(&self, offset: u64) {
        let mut state = self.inner.state.lock();
        state.base = offset;
        state.source_end = offset;
        state.mark = 0;
        state.read = 0;
        state.write = 0;
        state.epoch += 1;
        state.blocked_need = 0;
        drop(state);

        self.inner.space.notify_all();
    }

    /// Discard all content. The empty window sits at the previous end.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.base += state.write;
        state.mark = 0;
        state.read = 0;
        state.write = 0;
        drop(state);

        self.inner.space.notify_all();
    }

    /// Fail every current writer, waking any blocked on a full buffer.
    pub fn abort_writers(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.blocked_need = 0;
        drop(state);
        self.inner.space.notify_all();
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &state.capacity())
            .field("base", &state.base)
            .field("mark", &state.mark)
            .field("read", &state.read)
            .field("write", &state.write)
            .field("epoch", &state.epoch)
            .field("blocked_need", &state.blocked_need)
            .finish()
    }
}

/// Producer handle. Writes are all-or-nothing per chunk.
pub struct RingWriter {
    ring: RingBuffer,
    epoch: u64,
}

impl RingWriter {
    /// Append `bytes`, blocking while the ring lacks room for all of them.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, RingBufferError> {
        self.write_chunk(bytes, bytes.len() as u64)
    }

    /// Append `bytes` that were produced from `source_len` source bytes.
    pub fn write_chunk(&self, bytes: &[u8], source_len: u64) -> Result<usize, RingBufferError> {
        let inner = &self.ring.inner;
        let mut state = inner.state.lock();

        if bytes.len() > state.capacity() {
            return Err(RingBufferError::ChunkTooLarge {
                len: bytes.len(),
                capacity: state.capacity(),
            });
        }

        loop {
            if state.epoch != self.epoch {
                return Err(RingBufferError::Aborted);
            }
            if state.space_left() >= bytes.len() as u64 {
                state.blocked_need = 0;
                state.copy_in(bytes);
                state.source_end += source_len;
                return Ok(bytes.len());
            }
            state.blocked_need = bytes.len() as u64;
            inner.space.wait_for(&mut state, WRITER_WAIT);
        }
    }

    /// Returns `true` once the writer's epoch has been retired.
    pub fn is_aborted(&self) -> bool {
        self.ring.inner.state.lock().epoch != self.epoch
    }
}
