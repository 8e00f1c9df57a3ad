use std::time::Instant;
use tracing::error;

use tiered_log_sink::init::{init_tracing_with_config, LayerConfig};
use tiered_log_sink::memory_store::MemoryStore;
use tiered_log_sink::BatchingLogSink;

#[tokio::main]
async fn main() {
    let store = MemoryStore::new();
    let sink = BatchingLogSink::with_store(store.clone(), 1_000)
        .await
        .expect("memory store is always reachable");

    let layer_config = LayerConfig {
        channel_buffer: 50_000,
        enable_stdout: false,
        ..LayerConfig::default()
    };

    let shipper = init_tracing_with_config(sink, layer_config).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let report = shipper.shutdown().await.expect("shipping task");
    let elapsed = start.elapsed();
    println!("custom config: shipped {} of {} events in {} batches, {:?} (~{:.0} ev/s)",
        report.sink.records_written,
        n,
        store.committed_batches().len(),
        elapsed,
        report.sink.records_written as f64 / elapsed.as_secs_f64()
    );
}
