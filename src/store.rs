use crate::record::LogRecord;
use async_trait::async_trait;

/// Relation every store inserts into unless configured otherwise.
pub const DEFAULT_TABLE: &str = "tiered_logs";

/// Transactional row-insert target that a [`BatchingLogSink`] flushes into.
///
/// A flush drives one transaction through the store:
/// `begin`, one `insert` per buffered record in append order, `commit`.
/// Each row carries exactly three values (`event_time`, `level`,
/// `message`) that must all be bound explicitly; implementations must not
/// rely on server-side defaults for any of them.
///
/// Every method takes `&mut self`. The store is owned exclusively by one
/// sink and is never shared between concurrent callers.
///
/// [`BatchingLogSink`]: crate::sink::BatchingLogSink
#[async_trait]
pub trait LogStore: Send {
    /// Check that the backend is reachable and accepts our credentials.
    ///
    /// Called once when the sink is constructed. An error here is
    /// reported as a connection failure and is never retried.
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Open a transaction. Fails with [`StoreError::TransactionOpen`] if
    /// one is already open.
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Stage one row inside the open transaction.
    async fn insert(&mut self, record: &LogRecord) -> Result<(), StoreError>;

    /// Make every staged row durable at once.
    ///
    /// **Returns**
    /// - `Ok(())` once the backend acknowledged the whole batch.
    /// - `Err(..)` if nothing from the batch was persisted.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the staged rows of the open transaction, if any.
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Release the underlying connection.
    ///
    /// Default implementation is a no-op.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<S: LogStore + ?Sized> LogStore for Box<S> {
    async fn ping(&mut self) -> Result<(), StoreError> {
        (**self).ping().await
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        (**self).begin().await
    }

    async fn insert(&mut self, record: &LogRecord) -> Result<(), StoreError> {
        (**self).insert(record).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        (**self).rollback().await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        (**self).close().await
    }
}

/// Failures reported by a [`LogStore`] backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("no transaction is open")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionOpen,

    #[error("failed to encode row: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "clickhouse")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Failure injected by [`MemoryStore`](crate::memory_store::MemoryStore).
    #[error("injected failure: {0}")]
    Injected(&'static str),
}
