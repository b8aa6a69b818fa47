use std::{io, sync::Arc, time::Duration};

use crossbeam_channel::bounded;
use quanta::Clock;
use thiserror::Error;

use crate::{
    buffer::SharedBuffer,
    client::{Shutdown, StatsdClient},
    flusher::{FlushSignals, Flusher},
    recorder::StatsdRecorder,
    tag::Tag,
    transport::{ErrorHandler, Transport, TransportError, TransportSink, UdpTransport},
    writer::LineWriter,
};

const DEFAULT_PORT: u16 = 8125;
const DEFAULT_MAX_BUFFER_SIZE: usize = 512;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that could occur while building or installing a StatsD client/exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to resolve or connect to the remote address.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// The `host:port` that was being connected to.
        address: String,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The flush interval was zero.
    #[error("flush interval must be greater than zero")]
    InvalidFlushInterval,

    /// Failed to spawn the background flusher thread.
    #[error("failed to spawn background flusher thread")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder")]
    FailedToInstall,
}

/// Builder for a StatsD client.
pub struct StatsdBuilder {
    host: String,
    port: u16,
    max_buffer_size: usize,
    flush_interval: Duration,
    write_timeout: Duration,
    error_handler: Option<ErrorHandler>,
    prefix: Option<String>,
    tags: Vec<Tag>,
    clock: Clock,
    transport: Option<Box<dyn Transport>>,
}

impl StatsdBuilder {
    /// Creates a new `StatsdBuilder` that sends metrics to the given host.
    ///
    /// The host can be a hostname or an IP address. It is resolved once, when the client is built.
    pub fn new<H>(host: H) -> Self
    where
        H: Into<String>,
    {
        StatsdBuilder {
            host: host.into(),
            port: DEFAULT_PORT,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            error_handler: None,
            prefix: None,
            tags: Vec::new(),
            clock: Clock::new(),
            transport: None,
        }
    }

    /// Set the UDP port of the StatsD server.
    ///
    /// Defaults to 8125.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the maximum buffer size, in bytes.
    ///
    /// As soon as the buffered metrics reach this size, a flush is triggered without waiting for the flush interval.
    /// Since a metric is always buffered whole before the size is checked, payloads can exceed this size by up to one
    /// metric, so it should be kept comfortably below the largest datagram the network path allows.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Set the flush interval.
    ///
    /// Buffered metrics are sent at least this often, even if the buffer never fills up.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the write timeout for the UDP socket.
    ///
    /// When the write timeout is reached, the payload being sent at the time is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Set the error handler.
    ///
    /// The handler is called, from the background thread, whenever a payload cannot be sent or the transport fails to
    /// close. Without a handler, these errors are dropped.
    ///
    /// The handler must not close the client, as closing waits for the background thread to finish.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(TransportError) + Send + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Set the prefix prepended to every metric name.
    ///
    /// The prefix is separated from the metric name by a `.`, which is added if the prefix does not already end with
    /// one. The one exception is an empty prefix (or a lone `.`), which is the same as no prefix: metric names are
    /// sent as-is rather than with a leading `.`.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the default tags, replacing any previously configured ones.
    ///
    /// Default tags are added to every metric, in the given order, before any tags passed for that metric.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single default tag.
    #[must_use]
    pub fn with_tag<T>(mut self, tag: T) -> Self
    where
        T: Into<Tag>,
    {
        self.tags.push(tag.into());
        self
    }

    /// Set the clock used for timers.
    ///
    /// Mostly useful for tests, with a mocked clock.
    ///
    /// Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Use a custom transport instead of UDP.
    ///
    /// The host and port are ignored when a custom transport is set.
    #[must_use]
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport,
    {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Builds the client.
    ///
    /// Connects the transport and spawns the background flusher thread.
    ///
    /// # Errors
    ///
    /// If the flush interval is zero, if the remote address cannot be resolved or connected to, or if the background
    /// thread cannot be spawned, an error is returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        if self.flush_interval.is_zero() {
            return Err(BuildError::InvalidFlushInterval);
        }

        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let udp = UdpTransport::connect(&self.host, self.port, self.write_timeout).map_err(|source| {
                    BuildError::Connect { address: format!("{}:{}", self.host, self.port), source }
                })?;
                Box::new(udp)
            }
        };

        let (flush_tx, flush_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let buffer = Arc::new(SharedBuffer::new(self.max_buffer_size, flush_tx));
        let writer = LineWriter::new(self.prefix.as_deref(), &self.tags);

        let sink = TransportSink::new(transport, self.error_handler);
        let flusher = Flusher::new(Arc::clone(&buffer), sink, SharedBuffer::initial_capacity(self.max_buffer_size));
        let signals = FlushSignals { flush_interval: self.flush_interval, flush_rx, shutdown_rx };

        let handle = std::thread::Builder::new()
            .name("metrics-exporter-statsd-flusher".to_string())
            .spawn(move || flusher.run(signals))
            .map_err(|_| BuildError::Backend)?;

        Ok(StatsdClient::new(buffer, writer, self.clock, Shutdown { shutdown_tx, handle }))
    }

    /// Builds the client and wraps it in a recorder.
    ///
    /// The recorder must be manually installed by the caller.
    ///
    /// # Errors
    ///
    /// If the client cannot be built, an error is returned.
    pub fn build_recorder(self) -> Result<StatsdRecorder, BuildError> {
        self.build().map(StatsdRecorder::new)
    }

    /// Builds the client and installs it as the global recorder.
    ///
    /// A handle to the client is returned, so that it can be used directly and closed during shutdown.
    ///
    /// # Errors
    ///
    /// If the client cannot be built, or if a global recorder is already installed, an error is returned.
    pub fn install(self) -> Result<StatsdClient, BuildError> {
        let recorder = self.build_recorder()?;
        let client = recorder.client().clone();

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use super::{BuildError, StatsdBuilder};
    use crate::transport::Transport;

    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            Ok(payload.len())
        }
    }

    #[test]
    fn defaults() {
        let builder = StatsdBuilder::new("localhost");
        assert_eq!(builder.host, "localhost");
        assert_eq!(builder.port, 8125);
        assert_eq!(builder.max_buffer_size, 512);
        assert_eq!(builder.flush_interval, Duration::from_millis(100));
        assert_eq!(builder.write_timeout, Duration::from_secs(1));
        assert!(builder.error_handler.is_none());
        assert!(builder.prefix.is_none());
        assert!(builder.tags.is_empty());
        assert!(builder.transport.is_none());
    }

    #[test]
    fn tags_accumulate_and_replace() {
        let builder = StatsdBuilder::new("localhost").with_tag(("a", "1")).with_tag(("b", "2"));
        assert_eq!(builder.tags.len(), 2);
        assert_eq!(builder.tags[1].key(), "b");

        let builder = builder.with_tags([("c", "3")]);
        assert_eq!(builder.tags.len(), 1);
        assert_eq!(builder.tags[0].value(), "3");
    }

    #[test]
    fn zero_flush_interval_is_rejected() {
        let result =
            StatsdBuilder::new("localhost").with_flush_interval(Duration::ZERO).with_transport(NullTransport).build();
        assert!(matches!(result, Err(BuildError::InvalidFlushInterval)));
    }

    #[test]
    fn unresolvable_host_is_rejected() {
        let result = StatsdBuilder::new("not a valid host").build();
        assert!(matches!(result, Err(BuildError::Connect { .. })));
    }
}
