use crate::backend;
use crate::config::SinkConfig;
use crate::error::{FlushStage, SinkError};
use crate::record::LogRecord;
use crate::store::LogStore;
use std::num::NonZeroUsize;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What happens to the buffered records when a flush fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushFailurePolicy {
    /// Keep every buffered record; the next flush sends them again
    /// together with whatever was appended in the meantime.
    #[default]
    RetainBuffer,
    /// Discard the records of the failed batch.
    DropBatch,
}

/// Error returned when a flush failure policy name is not recognized.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown flush failure policy: {0:?}")]
pub struct ParseFlushFailurePolicyError(pub String);

impl FromStr for FlushFailurePolicy {
    type Err = ParseFlushFailurePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" | "retain_buffer" => Ok(FlushFailurePolicy::RetainBuffer),
            "drop" | "drop_batch" => Ok(FlushFailurePolicy::DropBatch),
            _ => Err(ParseFlushFailurePolicyError(s.to_string())),
        }
    }
}

/// Counters describing what a sink did so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Records accepted by [`BatchingLogSink::append`].
    pub appended: u64,
    /// Committed batches.
    pub flushes: u64,
    /// Flush attempts that returned a transaction error.
    pub failed_flushes: u64,
    /// Records committed to the store.
    pub records_written: u64,
    /// Records discarded under [`FlushFailurePolicy::DropBatch`].
    pub dropped_records: u64,
}

/// Buffers [`LogRecord`]s in memory and writes them to a [`LogStore`] in
/// batches, one transaction per batch.
///
/// The batch threshold is evaluated in [`append`](Self::append) only:
/// there is no timer and no background task. A flush triggered by
/// `append` is awaited before `append` returns, so a slow store slows the
/// producer down. Wrap calls in `tokio::time::timeout` to bound that.
///
/// A flush cancelled before it reached `commit` is rolled back at the
/// start of the next one. A flush cancelled while `commit` was in flight
/// has an unknown outcome: the records stay buffered and are sent again,
/// and whether that can duplicate rows depends on the store.
/// [`ClickHouseStore`](crate::clickhouse::ClickHouseStore) replays them
/// under their original deduplication token; the Postgres store cannot
/// tell and may write them twice.
///
/// All mutating methods take `&mut self`. Several producers have to
/// serialize through one owner, see
/// [`LogShippingLayer`](crate::layer::LogShippingLayer).
///
/// Before the process exits, call [`close`](Self::close) so that a
/// partially filled buffer still reaches the store.
pub struct BatchingLogSink<S: LogStore> {
    store: S,
    buffer: Vec<LogRecord>,
    batch_size: NonZeroUsize,
    policy: FlushFailurePolicy,
    open_transaction: bool,
    stats: SinkStats,
}

impl BatchingLogSink<Box<dyn LogStore>> {
    /// Connect to the store described by `dsn` and build a sink flushing
    /// every `batch_size` records.
    ///
    /// **Returns**
    /// - [`SinkError::InvalidBatchSize`] if `batch_size` is zero.
    /// - [`SinkError::Dsn`] if the DSN scheme is not recognized.
    /// - [`SinkError::Connection`] if the store is unreachable.
    pub async fn connect(dsn: &str, batch_size: usize) -> Result<Self, SinkError> {
        let config = SinkConfig {
            dsn: dsn.to_string(),
            batch_size,
            ..SinkConfig::default()
        };
        Self::from_config(&config).await
    }

    /// Same as [`connect`](Self::connect), driven by a full [`SinkConfig`].
    pub async fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        if config.batch_size == 0 {
            return Err(SinkError::InvalidBatchSize);
        }
        let store = backend::connect_store(config).await?;
        let sink = Self::with_store(store, config.batch_size).await?;
        Ok(sink.with_failure_policy(config.on_flush_error))
    }
}

impl<S: LogStore> BatchingLogSink<S> {
    /// Build a sink around an already constructed store.
    ///
    /// The store is pinged once; a failing ping is a fatal startup
    /// condition and is returned as [`SinkError::Connection`].
    pub async fn with_store(mut store: S, batch_size: usize) -> Result<Self, SinkError> {
        let batch_size = NonZeroUsize::new(batch_size).ok_or(SinkError::InvalidBatchSize)?;
        store.ping().await.map_err(SinkError::Connection)?;
        info!(batch_size = batch_size.get(), "log store connected");

        Ok(BatchingLogSink {
            store,
            buffer: Vec::with_capacity(batch_size.get()),
            batch_size,
            policy: FlushFailurePolicy::default(),
            open_transaction: false,
            stats: SinkStats::default(),
        })
    }

    pub fn with_failure_policy(mut self, policy: FlushFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Buffer one record, flushing the whole buffer once it holds
    /// `batch_size` records.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was buffered (and, when triggered, the
    ///   flush committed).
    /// - the flush error otherwise. The record itself was accepted into
    ///   the buffer either way.
    pub async fn append(&mut self, record: LogRecord) -> Result<(), SinkError> {
        self.buffer.push(record);
        self.stats.appended += 1;
        if self.buffer.len() >= self.batch_size.get() {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write every buffered record in one transaction.
    ///
    /// An empty buffer is a no-op and issues no store call. The buffer is
    /// cleared only after the commit succeeded; on failure it is handled
    /// according to the configured [`FlushFailurePolicy`].
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.open_transaction {
            // A previous flush was cancelled before its commit returned.
            self.rollback_open_transaction().await;
        }

        let count = self.buffer.len();
        match self.write_batch().await {
            Ok(()) => {
                self.buffer.clear();
                self.stats.flushes += 1;
                self.stats.records_written += count as u64;
                debug!(records = count, "flushed log batch");
                Ok(())
            }
            Err(err) => {
                self.stats.failed_flushes += 1;
                match self.policy {
                    FlushFailurePolicy::RetainBuffer => {
                        warn!(records = count, error = %err, "log batch flush failed, keeping records buffered");
                    }
                    FlushFailurePolicy::DropBatch => {
                        self.buffer.clear();
                        self.stats.dropped_records += count as u64;
                        warn!(records = count, error = %err, "log batch flush failed, dropping records");
                    }
                }
                Err(err)
            }
        }
    }

    /// Flush what is left and release the store connection.
    ///
    /// The store is closed on every path. A flush error takes precedence
    /// over a close error.
    pub async fn close(self) -> Result<(), SinkError> {
        self.shutdown().await.1
    }

    /// Like [`close`](Self::close), also handing back the final counters.
    pub async fn shutdown(mut self) -> (SinkStats, Result<(), SinkError>) {
        let flushed = self.flush().await;
        let closed = self.store.close().await;
        info!(
            records_written = self.stats.records_written,
            flushes = self.stats.flushes,
            "log store closed"
        );
        let result = flushed.and(closed.map_err(SinkError::Close));
        (self.stats, result)
    }

    /// Number of records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn failure_policy(&self) -> FlushFailurePolicy {
        self.policy
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    async fn write_batch(&mut self) -> Result<(), SinkError> {
        self.store
            .begin()
            .await
            .map_err(|source| SinkError::Transaction { stage: FlushStage::Begin, source })?;
        self.open_transaction = true;

        let mut failed = None;
        for (index, record) in self.buffer.iter().enumerate() {
            if let Err(source) = self.store.insert(record).await {
                failed = Some((index, source));
                break;
            }
        }
        if let Some((index, source)) = failed {
            self.rollback_open_transaction().await;
            return Err(SinkError::Transaction {
                stage: FlushStage::Insert { index },
                source,
            });
        }

        let committed = self.store.commit().await;
        self.open_transaction = false;
        committed.map_err(|source| SinkError::Transaction { stage: FlushStage::Commit, source })
    }

    async fn rollback_open_transaction(&mut self) {
        if let Err(e) = self.store.rollback().await {
            warn!(error = %e, "log batch rollback failed");
        }
        self.open_transaction = false;
    }
}

impl<S: LogStore> Drop for BatchingLogSink<S> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            warn!(records = self.buffer.len(), "log sink dropped with unflushed records");
        }
    }
}
