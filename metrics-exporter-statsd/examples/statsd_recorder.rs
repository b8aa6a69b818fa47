use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_statsd::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::new("localhost")
        .with_port(9125)
        .with_flush_interval(Duration::from_secs(1))
        .install()
        .expect("failed to install StatsD recorder");

    let server_loops = counter!("tcp_server_loops", "system" => "foo");
    let server_loop_delta_secs = histogram!("tcp_server_loop_delta_secs", "system" => "foo");

    // Loop for a while, pretending to do some work.
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        let iteration = Instant::now();
        server_loops.increment(1);
        gauge!("lucky_iterations").increment(1.0);

        std::thread::sleep(Duration::from_millis(50));
        server_loop_delta_secs.record(iteration.elapsed());
    }

    client.close().expect("client was already closed");
}
