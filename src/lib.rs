pub mod record;
pub mod store;
pub mod sink;
pub mod error;
pub mod backend;
pub mod config;
pub mod env;
pub mod memory_store;
pub mod layer;
pub mod init;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{FlushStage, SinkError};
pub use record::{Level, LogRecord};
pub use sink::{BatchingLogSink, FlushFailurePolicy, ParseFlushFailurePolicyError, SinkStats};
pub use store::{LogStore, StoreError};
