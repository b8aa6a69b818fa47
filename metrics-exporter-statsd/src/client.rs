use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    buffer::SharedBuffer,
    tag::Tag,
    transport::TransportSink,
    writer::{LineWriter, MetricType, MetricValue, MetricValueFormatter},
};

/// Errors that could occur while closing a client.
#[derive(Debug, Error)]
pub enum CloseError {
    /// The client was already closed, or is being closed by another caller.
    #[error("client was already closed")]
    AlreadyClosed,

    /// The background flusher thread panicked, so the final flush may not have happened.
    #[error("background flusher thread panicked")]
    Backend,
}

/// Lifecycle state of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    /// Metrics are accepted and flushed in the background.
    Running = 0,

    /// Shutdown was requested and the final flush is in progress. Metrics are no longer accepted.
    Closing = 1,

    /// The final flush has completed and the transport is closed.
    Closed = 2,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Running,
            1 => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }
}

/// Everything needed to stop the flusher, taken exactly once by whoever wins the transition out of `Running`.
pub(crate) struct Shutdown {
    pub shutdown_tx: Sender<()>,
    pub handle: JoinHandle<TransportSink>,
}

struct Inner {
    buffer: Arc<SharedBuffer>,
    writer: LineWriter,
    clock: Clock,
    state: AtomicU8,
    shutdown: Mutex<Option<Shutdown>>,
}

impl Inner {
    fn send(&self, name: &str, value: MetricValue, metric_type: MetricType, tags: &[Tag]) {
        let mut formatter = MetricValueFormatter::new();
        let value = formatter.format(value);

        let appended = self.buffer.append(|buf| self.writer.write_line(buf, name, value, metric_type, tags));
        if !appended {
            trace!(metric_name = name, "Client is closed, dropping metric.");
        }
    }

    fn close(&self) -> Result<(), CloseError> {
        let (running, closing) = (ClientState::Running as u8, ClientState::Closing as u8);
        self.state
            .compare_exchange(running, closing, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CloseError::AlreadyClosed)?;

        // Whoever wins the transition above is the only caller to get here.
        let Shutdown { shutdown_tx, handle } = self.shutdown.lock().take().ok_or(CloseError::AlreadyClosed)?;

        debug!("Closing client.");

        self.buffer.seal();
        let _ = shutdown_tx.send(());
        let result = handle.join();

        self.state.store(ClientState::Closed as u8, Ordering::Release);

        let sink = result.map_err(|_| CloseError::Backend)?;
        sink.close();

        debug!("Client closed.");

        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The last handle went away without an explicit close, so make sure buffered metrics still go out.
        if let Err(CloseError::Backend) = self.close() {
            debug!("Background flusher thread panicked during implicit close.");
        }
    }
}

/// A buffered StatsD client.
///
/// Metrics are written into a shared buffer and sent by a background thread, either every flush interval or as soon as
/// the buffer reaches its maximum size, whichever comes first. Emitting a metric never blocks on the network and never
/// fails: if the transport fails, the affected metrics are dropped and the configured error handler is notified.
///
/// `StatsdClient` is cheap to clone, and all clones share the same buffer and background thread. The client is shut
/// down by calling [`close`][StatsdClient::close], or implicitly when the last clone (including any outstanding
/// [`Timer`]) is dropped.
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    pub(crate) fn new(buffer: Arc<SharedBuffer>, writer: LineWriter, clock: Clock, shutdown: Shutdown) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer,
                writer,
                clock,
                state: AtomicU8::new(ClientState::Running as u8),
                shutdown: Mutex::new(Some(shutdown)),
            }),
        }
    }

    /// Sends a counter delta.
    ///
    /// A delta of zero is skipped entirely, as it would not change the counter.
    pub fn count(&self, name: &str, value: i64, tags: &[Tag]) {
        if value == 0 {
            return;
        }

        self.inner.send(name, MetricValue::Signed(value), MetricType::Counter, tags);
    }

    /// Increments a counter by one.
    pub fn increment(&self, name: &str, tags: &[Tag]) {
        self.count(name, 1, tags);
    }

    /// Sends a gauge value.
    pub fn gauge(&self, name: &str, value: f64, tags: &[Tag]) {
        self.inner.send(name, MetricValue::FloatingPoint(value), MetricType::Gauge, tags);
    }

    /// Sends a timing, in whole milliseconds.
    pub fn timing(&self, name: &str, duration: Duration, tags: &[Tag]) {
        self.inner.send(name, MetricValue::Unsigned(duration.as_millis()), MetricType::Timer, tags);
    }

    /// Starts a timer.
    ///
    /// The elapsed time is sent as a timing when [`Timer::stop`] is called. Dropping the timer without stopping it
    /// sends nothing.
    pub fn timer<N>(&self, name: N, tags: &[Tag]) -> Timer
    where
        N: Into<String>,
    {
        Timer {
            client: self.clone(),
            name: name.into(),
            tags: tags.to_vec(),
            start: self.inner.clock.now(),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Closes the client.
    ///
    /// Stops accepting metrics, flushes everything buffered so far, waits for that flush to be attempted, and then
    /// closes the transport. Any failure while closing the transport is sent to the error handler.
    ///
    /// # Errors
    ///
    /// If the client was already closed, or is being closed concurrently, [`CloseError::AlreadyClosed`] is returned
    /// immediately. If the background thread panicked, [`CloseError::Backend`] is returned.
    pub fn close(&self) -> Result<(), CloseError> {
        self.inner.close()
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdClient").field("state", &self.state()).finish_non_exhaustive()
    }
}

/// A running timer, created by [`StatsdClient::timer`].
#[must_use = "timers send nothing unless stopped"]
pub struct Timer {
    client: StatsdClient,
    name: String,
    tags: Vec<Tag>,
    start: Instant,
}

impl Timer {
    /// Returns the time elapsed since the timer was started.
    pub fn elapsed(&self) -> Duration {
        self.client.inner.clock.now().duration_since(self.start)
    }

    /// Stops the timer and sends the elapsed time as a timing.
    pub fn stop(self) {
        self.client.timing(&self.name, self.elapsed(), &self.tags);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("name", &self.name).field("tags", &self.tags).finish_non_exhaustive()
    }
}
