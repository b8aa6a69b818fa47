use std::{sync::Arc, time::Duration};

use crossbeam_channel::{select, tick, Receiver};
use tracing::debug;

use crate::{buffer::SharedBuffer, transport::TransportSink};

/// Channels driving the flusher.
pub(crate) struct FlushSignals {
    /// How often to flush regardless of buffer size.
    pub flush_interval: Duration,

    /// Size-based flush requests from callers.
    pub flush_rx: Receiver<()>,

    /// Shutdown request. A message or a disconnect both cause the final flush.
    pub shutdown_rx: Receiver<()>,
}

/// Drains the shared buffer into the transport.
///
/// All flushes happen on the flusher's thread, one at a time.
pub(crate) struct Flusher {
    buffer: Arc<SharedBuffer>,
    sink: TransportSink,
    spare: Vec<u8>,
}

impl Flusher {
    /// Creates a new `Flusher`.
    pub fn new(buffer: Arc<SharedBuffer>, sink: TransportSink, capacity: usize) -> Self {
        Self { buffer, sink, spare: Vec::with_capacity(capacity) }
    }

    /// Runs the flusher until shutdown is requested.
    ///
    /// Flushes every `flush_interval`, whenever a flush is requested, and one final time on shutdown. The transport
    /// sink is handed back once the final flush has been attempted, so the caller can close it.
    pub fn run(mut self, signals: FlushSignals) -> TransportSink {
        let FlushSignals { flush_interval, flush_rx, shutdown_rx } = signals;
        let ticker = tick(flush_interval);

        debug!(?flush_interval, "Flusher started.");

        loop {
            select! {
                recv(ticker) -> _ => self.flush(),
                recv(flush_rx) -> _ => self.flush(),
                recv(shutdown_rx) -> _ => {
                    self.flush();
                    break;
                }
            }
        }

        debug!("Flusher stopped.");

        self.sink
    }

    /// Drains the buffer and sends its contents as a single payload.
    ///
    /// Does nothing if the buffer is empty. The lock is only held while swapping buffers, never while sending.
    fn flush(&mut self) {
        if !self.buffer.swap_out(&mut self.spare) {
            return;
        }

        // Every line ends with a newline, but the last line in a payload doesn't need one.
        let payload = self.spare.strip_suffix(b"\n").unwrap_or(&self.spare);
        self.sink.send(payload);

        self.spare.clear();
    }
}
