use std::fmt;

use crate::backend::{BackendKind, DsnError};
use crate::store::StoreError;

/// Step of a flush transaction at which a store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStage {
    Begin,
    /// Insert of the buffered record at `index` (0-based, append order).
    Insert { index: usize },
    Commit,
}

impl fmt::Display for FlushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushStage::Begin => f.write_str("begin"),
            FlushStage::Insert { index } => write!(f, "insert of row {}", index),
            FlushStage::Commit => f.write_str("commit"),
        }
    }
}

/// Error type returned by [`BatchingLogSink`](crate::sink::BatchingLogSink).
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// The store was unreachable or refused the handshake at construction.
    #[error("failed to connect to log store: {0}")]
    Connection(#[source] StoreError),

    /// Begin, insert or commit failed while flushing a batch.
    #[error("log batch transaction failed during {stage}: {source}")]
    Transaction {
        stage: FlushStage,
        #[source]
        source: StoreError,
    },

    /// Releasing the connection failed after the final flush.
    #[error("failed to close log store: {0}")]
    Close(#[source] StoreError),

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("backend {0:?} is not enabled in this build")]
    BackendUnavailable(BackendKind),
}

impl SinkError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SinkError::Connection(_))
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, SinkError::Transaction { .. })
    }

    /// Stage of the failed flush, for transaction errors.
    pub fn flush_stage(&self) -> Option<FlushStage> {
        match self {
            SinkError::Transaction { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
