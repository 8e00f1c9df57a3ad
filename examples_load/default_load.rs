use std::time::Instant;
use tracing::error;

use tiered_log_sink::init::init_tracing;
use tiered_log_sink::memory_store::MemoryStore;
use tiered_log_sink::BatchingLogSink;

#[tokio::main]
async fn main() {
    let sink = BatchingLogSink::with_store(MemoryStore::new(), 128)
        .await
        .expect("memory store is always reachable");
    let shipper = init_tracing(sink).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let report = shipper.shutdown().await.expect("shipping task");
    println!("written: {}, dropped: {}", report.sink.records_written, report.layer.dropped_events);
}
