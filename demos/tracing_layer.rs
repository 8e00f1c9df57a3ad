use std::error::Error;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use tiered_log_sink::config::SinkConfig;
use tiered_log_sink::init::init_tracing;
use tiered_log_sink::BatchingLogSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // LOG_SINK_DSN, LOG_SINK_BATCH_SIZE, ... ; defaults point at a local
    // ClickHouse.
    let config = SinkConfig::from_env()?;
    let sink = BatchingLogSink::from_config(&config).await?;
    let shipper = init_tracing(sink)?;

    info!("starting service");
    for i in 0..10 {
        info!(iteration = i, "This is an info log entry");
        sleep(Duration::from_millis(200)).await;
    }
    warn!(disk = "sda", used_pct = 91, "disk almost full");
    error!(user_id = 42, reason = "invalid password", "authentication failed");

    let report = shipper.shutdown().await?;
    report.result?;
    println!(
        "shipped {} records in {} batches ({} dropped by the layer)",
        report.sink.records_written, report.sink.flushes, report.layer.dropped_events
    );
    Ok(())
}
