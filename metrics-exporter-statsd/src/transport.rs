use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported to the error handler by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to send a payload.
    ///
    /// The metrics in the payload are lost.
    #[error("failed to send payload: {0}")]
    Send(#[source] io::Error),

    /// Failed to close the transport.
    #[error("failed to close transport: {0}")]
    Close(#[source] io::Error),
}

/// Callback invoked with transport failures.
pub type ErrorHandler = Box<dyn Fn(TransportError) + Send + 'static>;

/// A best-effort, message-oriented transport.
///
/// Every call to `send` carries one complete payload of newline-delimited metric lines. Implementations should not
/// retry or buffer: a failed send is reported and the payload is dropped.
pub trait Transport: Send + 'static {
    /// Sends a single payload, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be written, an error is returned.
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Closes the transport.
    ///
    /// No further calls to `send` are made after `close`.
    ///
    /// # Errors
    ///
    /// If the transport could not be closed cleanly, an error is returned.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A UDP transport connected to a single StatsD server.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Resolves `host:port` and connects a UDP socket to it.
    ///
    /// The local socket is bound to the unspecified address of the same IP family as the first resolved address.
    ///
    /// # Errors
    ///
    /// If `host:port` does not resolve to at least one address, or the socket cannot be bound, connected, or
    /// configured, an error is returned.
    pub fn connect(host: &str, port: u16, write_timeout: Duration) -> io::Result<Self> {
        let addrs = (host, port).to_socket_addrs()?.collect::<Vec<_>>();
        let first = addrs.first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for '{host}:{port}'"))
        })?;

        let bind_addr = match first {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(&addrs[..])?;
        socket.set_write_timeout(Some(write_timeout))?;

        Ok(Self { socket })
    }

    /// Returns the remote address the socket is connected to.
    ///
    /// # Errors
    ///
    /// If the peer address cannot be queried, an error is returned.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport").field("peer_addr", &self.socket.peer_addr().ok()).finish()
    }
}

/// Owns the transport and routes its failures to the error handler.
///
/// Panics raised by the transport or the error handler are caught here, so that they can never take down the flusher
/// and leave the buffer growing with nothing left to drain it.
pub(crate) struct TransportSink {
    transport: Box<dyn Transport>,
    error_handler: Option<ErrorHandler>,
}

impl TransportSink {
    pub fn new(transport: Box<dyn Transport>, error_handler: Option<ErrorHandler>) -> Self {
        Self { transport, error_handler }
    }

    /// Sends a payload, making exactly one attempt.
    pub fn send(&mut self, payload: &[u8]) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.transport.send(payload))) {
            Ok(Ok(written)) => debug!(payload_len = payload.len(), written, "Sent payload."),
            Ok(Err(e)) => self.report(TransportError::Send(e)),
            Err(_) => warn!(payload_len = payload.len(), "Transport panicked while sending, dropping payload."),
        }
    }

    /// Closes the transport.
    pub fn close(mut self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.transport.close())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(TransportError::Close(e)),
            Err(_) => warn!("Transport panicked while closing."),
        }
    }

    fn report(&self, error: TransportError) {
        let Some(handler) = &self.error_handler else {
            debug!(%error, "Dropping transport error, no error handler configured.");
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| handler(error))).is_err() {
            warn!("Error handler panicked.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        net::UdpSocket,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::{ErrorHandler, Transport, TransportError, TransportSink, UdpTransport};

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn close(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "close failed"))
        }
    }

    #[test]
    fn failures_go_to_error_handler() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handler_errors = Arc::clone(&errors);

        let mut sink = TransportSink::new(
            Box::new(FailingTransport),
            Some(Box::new(move |e: TransportError| handler_errors.lock().unwrap().push(e))),
        );
        sink.send(b"a:1|c");
        sink.close();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], TransportError::Send(e) if e.kind() == io::ErrorKind::ConnectionRefused));
        assert!(matches!(&errors[1], TransportError::Close(_)));
    }

    #[test]
    fn failures_without_error_handler_are_dropped() {
        let mut sink = TransportSink::new(Box::new(FailingTransport), None);
        sink.send(b"a:1|c");
        sink.close();
    }

    struct PanickingTransport;

    impl Transport for PanickingTransport {
        fn send(&mut self, _: &[u8]) -> io::Result<usize> {
            panic!("send exploded");
        }

        fn close(&mut self) -> io::Result<()> {
            panic!("close exploded");
        }
    }

    #[test]
    fn panics_do_not_escape() {
        let mut sink = TransportSink::new(Box::new(PanickingTransport), None);
        sink.send(b"a:1|c");
        sink.send(b"b:1|c");
        sink.close();

        let handler: ErrorHandler = Box::new(|_| panic!("handler exploded"));
        let mut sink = TransportSink::new(Box::new(FailingTransport), Some(handler));
        sink.send(b"a:1|c");
        sink.send(b"b:1|c");
        sink.close();
    }

    #[test]
    fn udp_transport_sends_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = server.local_addr().unwrap().port();

        let mut transport = UdpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.peer_addr().unwrap(), server.local_addr().unwrap());
        assert_eq!(transport.send(b"a:1|c\nb:2|g").unwrap(), 11);

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"a:1|c\nb:2|g");
    }

    #[test]
    fn udp_transport_rejects_unresolvable_host() {
        assert!(UdpTransport::connect("not a valid host", 8125, Duration::from_secs(1)).is_err());
    }
}
