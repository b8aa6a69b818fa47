use std::{collections::HashMap, sync::Arc, time::Duration};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use parking_lot::Mutex;
use tracing::trace;

use crate::{client::StatsdClient, tag::Tag};

/// A recorder that forwards metrics to a StatsD server.
///
/// Counter increments are sent as counter deltas, gauges as their absolute value after every update, and histogram
/// values, interpreted as seconds, as timings. Metric labels are sent as tags.
pub struct StatsdRecorder {
    client: StatsdClient,
    gauges: Mutex<HashMap<Key, Arc<Mutex<f64>>>>,
}

impl StatsdRecorder {
    pub(crate) fn new(client: StatsdClient) -> Self {
        StatsdRecorder { client, gauges: Mutex::new(HashMap::new()) }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &StatsdClient {
        &self.client
    }

    fn handle(&self, key: &Key) -> MetricHandle {
        MetricHandle {
            client: self.client.clone(),
            name: key.name().to_owned(),
            tags: key.labels().map(Tag::from).collect(),
        }
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CounterHandle(self.handle(key))))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        // Gauge updates can be relative, so every handle for the same key has to share the current value.
        let value = Arc::clone(self.gauges.lock().entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(0.0))));

        Gauge::from_arc(Arc::new(GaugeHandle { handle: self.handle(key), value }))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(HistogramHandle(self.handle(key))))
    }
}

struct MetricHandle {
    client: StatsdClient,
    name: String,
    tags: Vec<Tag>,
}

struct CounterHandle(MetricHandle);

impl CounterFn for CounterHandle {
    fn increment(&self, value: u64) {
        let MetricHandle { client, name, tags } = &self.0;
        client.count(name, i64::try_from(value).unwrap_or(i64::MAX), tags);
    }

    fn absolute(&self, _: u64) {
        trace!(metric_name = %self.0.name, "Absolute counter values are not supported, ignoring.");
    }
}

struct GaugeHandle {
    handle: MetricHandle,
    value: Arc<Mutex<f64>>,
}

impl GaugeHandle {
    fn update<F>(&self, f: F)
    where
        F: FnOnce(f64) -> f64,
    {
        // The value is emitted before the lock is released, so concurrent updates reach the buffer in the same order
        // they were applied and the last value sent always matches the local one.
        let mut value = self.value.lock();
        *value = f(*value);

        let MetricHandle { client, name, tags } = &self.handle;
        client.gauge(name, *value, tags);
    }
}

impl GaugeFn for GaugeHandle {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.update(|_| value);
    }
}

struct HistogramHandle(MetricHandle);

impl HistogramFn for HistogramHandle {
    fn record(&self, value: f64) {
        let MetricHandle { client, name, tags } = &self.0;
        match Duration::try_from_secs_f64(value) {
            Ok(duration) => client.timing(name, duration, tags),
            Err(_) => trace!(metric_name = %name, value, "Histogram value is not a valid duration, ignoring."),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, thread, time::Duration};

    use crossbeam_channel::{unbounded, Receiver, Sender};
    use metrics::{Key, Label, Recorder};

    use crate::{builder::StatsdBuilder, transport::Transport};

    static METADATA: metrics::Metadata =
        metrics::Metadata::new(module_path!(), metrics::Level::INFO, Some(module_path!()));

    struct ChannelTransport(Sender<Vec<u8>>);

    impl Transport for ChannelTransport {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            let _ = self.0.send(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn recorder() -> (super::StatsdRecorder, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let recorder = StatsdBuilder::new("localhost")
            .with_flush_interval(Duration::from_secs(3600))
            .with_prefix("app")
            .with_transport(ChannelTransport(tx))
            .build_recorder()
            .unwrap();
        (recorder, rx)
    }

    fn close_and_collect(recorder: &super::StatsdRecorder, rx: &Receiver<Vec<u8>>) -> String {
        recorder.client().close().unwrap();
        let payload = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        String::from_utf8(payload).unwrap()
    }

    #[test]
    fn counters() {
        let (recorder, rx) = recorder();

        let key = Key::from_parts("requests", vec![Label::new("route", "home")]);
        let counter = recorder.register_counter(&key, &METADATA);
        counter.increment(3);
        counter.increment(0);
        counter.absolute(42);

        assert_eq!(close_and_collect(&recorder, &rx), "app.requests:3;route=home|c");
    }

    #[test]
    fn gauges_share_state_across_handles() {
        let (recorder, rx) = recorder();

        let key = Key::from_name("connections");
        recorder.register_gauge(&key, &METADATA).set(10.0);
        recorder.register_gauge(&key, &METADATA).increment(2.5);
        recorder.register_gauge(&key, &METADATA).decrement(1.0);

        assert_eq!(
            close_and_collect(&recorder, &rx),
            "app.connections:10|g\napp.connections:12.5|g\napp.connections:11.5|g"
        );
    }

    #[test]
    fn concurrent_gauge_updates_are_sent_in_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 100;

        let (recorder, rx) = recorder();
        let key = Key::from_name("in_flight");

        let handles = (0..THREADS)
            .map(|_| {
                let gauge = recorder.register_gauge(&key, &METADATA);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        gauge.increment(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        recorder.client().close().unwrap();

        let values = rx
            .try_iter()
            .flat_map(|payload| {
                String::from_utf8(payload)
                    .unwrap()
                    .split('\n')
                    .map(|line| line.strip_prefix("app.in_flight:").unwrap().strip_suffix("|g").unwrap().to_owned())
                    .collect::<Vec<_>>()
            })
            .map(|value| value.parse::<usize>().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(values, (1..=THREADS * PER_THREAD).collect::<Vec<_>>());
    }

    #[test]
    fn histograms_as_timings() {
        let (recorder, rx) = recorder();

        let key = Key::from_name("query");
        let histogram = recorder.register_histogram(&key, &METADATA);
        histogram.record(0.25);
        histogram.record(-1.0);
        histogram.record(Duration::from_millis(1500));

        assert_eq!(close_and_collect(&recorder, &rx), "app.query:250|ms\napp.query:1500|ms");
    }
}
