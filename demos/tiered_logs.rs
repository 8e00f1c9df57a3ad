//! Ships ten records into the tiered ClickHouse table in batches of five,
//! then flushes whatever is left before exiting.
//!
//! The table is expected to exist, see `sql/tiered_logs.sql`.

use std::process::ExitCode;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use tiered_log_sink::env::{env_or, LOG_SINK_DSN_ENV};
use tiered_log_sink::{BatchingLogSink, Level, LogRecord};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    // Replace with your credentials and host.
    let dsn = env_or(
        LOG_SINK_DSN_ENV,
        "tcp://localhost:8123?database=default&username=default&password=",
    );

    let mut sink = match BatchingLogSink::connect(&dsn, 5).await {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "failed to connect to ClickHouse");
            return ExitCode::FAILURE;
        }
    };

    for i in 0..10 {
        let record = LogRecord::new(Level::Info, format!("This is an info log entry iteration={i}"));
        info!(iteration = i, "This is an info log entry");
        if let Err(e) = sink.append(record).await {
            error!(error = %e, "failed to ship log batch");
        }
        sleep(Duration::from_secs(1)).await;
    }

    // Flush any remaining records before exiting.
    if let Err(e) = sink.close().await {
        error!(error = %e, "failed to flush logs to ClickHouse");
        return ExitCode::FAILURE;
    }

    println!("Logs sent to ClickHouse.");
    ExitCode::SUCCESS
}
