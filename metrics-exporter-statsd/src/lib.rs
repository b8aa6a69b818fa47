//! A buffered [StatsD][statsd] client, usable directly or as a [`metrics`]-compatible exporter.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::Duration;
//! # use metrics_exporter_statsd::{StatsdBuilder, Tag};
//! // First, create a builder pointing at the StatsD server, and configure it as needed.
//! let client = StatsdBuilder::new("127.0.0.1")
//!     .with_prefix("app")
//!     .with_tag(("env", "prod"))
//!     .build()
//!     .expect("failed to build StatsD client");
//!
//! // Emit metrics from anywhere. The client is cheap to clone, and emitting a metric never blocks on the network.
//! client.increment("signup", &[]);
//! client.gauge("load", 1.5, &[Tag::new("host", "web-1")]);
//! client.timing("query", Duration::from_millis(250), &[]);
//!
//! let timer = client.timer("request", &[]);
//! // ... do some work ...
//! timer.stop();
//!
//! // Finally, close the client to flush anything still buffered.
//! client.close().expect("client was already closed");
//! ```
//!
//! To route the [`metrics`] macros through the same client, call [`StatsdBuilder::install`] instead of
//! [`StatsdBuilder::build`], which installs a [`StatsdRecorder`] as the global recorder and returns the client.
//!
//! # Wire format
//!
//! Every metric is written as a single line:
//!
//! ```text
//! <prefix><name>:<value>[;<key>=<value>]*|<type>
//! ```
//!
//! where `type` is `c` for counters, `g` for gauges, and `ms` for timers. Tags configured on the builder come first,
//! followed by the tags passed for that metric. Tags are not escaped, so keys and values must not contain any of the
//! characters used by the format itself.
//!
//! # Buffering
//!
//! Metric lines are appended to a single shared buffer. A background thread sends the contents of the buffer as one
//! datagram every flush interval, or as soon as the buffer reaches the maximum buffer size, whichever comes first.
//! Lines within a datagram are separated by newlines, and the final newline is omitted.
//!
//! Sending is best-effort: a failed send is never retried, and the metrics in it are lost. Failures are reported to the
//! error handler, if one is configured.
//!
//! # Shutdown
//!
//! [`StatsdClient::close`] stops accepting new metrics, flushes everything buffered so far, and waits for that flush
//! to be attempted before returning. Metrics emitted after the client starts closing are dropped.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buffer;

mod builder;
pub use self::builder::{BuildError, StatsdBuilder};

mod client;
pub use self::client::{ClientState, CloseError, StatsdClient, Timer};

mod flusher;

mod recorder;
pub use self::recorder::StatsdRecorder;

mod tag;
pub use self::tag::Tag;

mod transport;
pub use self::transport::{ErrorHandler, Transport, TransportError, UdpTransport};

mod writer;
