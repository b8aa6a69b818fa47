use std::time::Duration;

use metrics_exporter_statsd::{StatsdBuilder, Tag};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::new("localhost")
        .with_port(9125)
        .with_prefix("example")
        .with_tag(("env", "dev"))
        .with_error_handler(|e| eprintln!("statsd error: {e}"))
        .build()
        .expect("failed to build StatsD client");

    // Pretend to handle some requests, then shut down cleanly.
    for i in 0..100u32 {
        let timer = client.timer("request", &[Tag::new("route", "home")]);

        client.increment("requests", &[]);
        client.gauge("in_flight", f64::from(i % 7), &[]);

        std::thread::sleep(Duration::from_millis(10));
        timer.stop();
    }

    client.close().expect("client was already closed");
}
