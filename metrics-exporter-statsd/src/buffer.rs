use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::trace;

/// Initial buffer capacity, as a multiple of the maximum buffer size.
///
/// Lines are appended before the size check runs, so the buffer routinely overshoots the maximum by up to one line.
const BUFFER_CAPACITY_FACTOR: usize = 2;

/// Byte buffer shared between metric callers and the flusher.
///
/// Callers append complete lines while holding the lock, and the flusher swaps the entire contents out while holding
/// the lock. Nothing else touches the underlying storage.
pub(crate) struct SharedBuffer {
    buf: Mutex<Vec<u8>>,
    max_len: usize,
    flush_tx: Sender<()>,
    sealed: AtomicBool,
}

impl SharedBuffer {
    /// Creates a new `SharedBuffer`.
    ///
    /// Once the buffer holds at least `max_len` bytes, a flush is requested through `flush_tx`. The channel is expected
    /// to be bounded with a capacity of one.
    pub fn new(max_len: usize, flush_tx: Sender<()>) -> Self {
        Self {
            buf: Mutex::new(Vec::with_capacity(Self::initial_capacity(max_len))),
            max_len,
            flush_tx,
            sealed: AtomicBool::new(false),
        }
    }

    /// Returns the capacity to allocate for a buffer with the given maximum length.
    pub fn initial_capacity(max_len: usize) -> usize {
        max_len.saturating_mul(BUFFER_CAPACITY_FACTOR)
    }

    /// Appends to the buffer.
    ///
    /// `write` is called with the lock held and must only append complete lines. If the buffer has been sealed,
    /// `write` is not called and `false` is returned.
    pub fn append<F>(&self, write: F) -> bool
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let len = {
            let mut buf = self.buf.lock();
            if self.sealed.load(Ordering::Acquire) {
                return false;
            }

            write(&mut *buf);
            buf.len()
        };

        if len >= self.max_len {
            self.request_flush();
        }

        true
    }

    /// Requests a flush without blocking.
    ///
    /// If a flush request is already pending, this one is dropped: the pending flush picks up everything in the buffer
    /// at the time it runs.
    pub fn request_flush(&self) {
        match self.flush_tx.try_send(()) {
            Ok(()) => trace!("Requested flush."),
            Err(TrySendError::Full(())) => trace!("Flush already pending."),
            Err(TrySendError::Disconnected(())) => trace!("Flusher is gone, dropping flush request."),
        }
    }

    /// Swaps the buffered contents into `spare`.
    ///
    /// `spare` must be empty. If the buffer is empty, nothing is swapped and `false` is returned. Otherwise, the
    /// buffer takes over the storage of `spare`, so the allocations on both sides are reused across flushes.
    pub fn swap_out(&self, spare: &mut Vec<u8>) -> bool {
        debug_assert!(spare.is_empty(), "spare buffer must be empty before swapping");

        let mut buf = self.buf.lock();
        if buf.is_empty() {
            return false;
        }

        std::mem::swap(&mut *buf, spare);
        true
    }

    /// Seals the buffer, rejecting any further appends.
    pub fn seal(&self) {
        // Taking the lock orders the seal against in-flight appends: every append either completes before this, and
        // is picked up by the final flush, or observes the seal and is rejected.
        let _buf = self.buf.lock();
        self.sealed.store(true, Ordering::Release);
    }

    /// Returns the number of buffered bytes.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }
}
