use crate::record::LogRecord;
use crate::store::{LogStore, StoreError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// In-process [`LogStore`] that keeps committed batches in memory.
///
/// Clones share their state, so a test can hand one clone to a sink and
/// inspect the other. Failures can be injected at every step of the
/// transaction. Also useful for measuring the overhead of the sink and
/// layer without any external I/O.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    unreachable: bool,
    staged: Option<Vec<LogRecord>>,
    committed: Vec<Vec<LogRecord>>,
    transactions_started: usize,
    rollbacks: usize,
    closed: bool,
    fail_begin: bool,
    fail_insert_at: Option<usize>,
    fail_commit: bool,
    insert_delay: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose ping always fails.
    pub fn unreachable() -> Self {
        let store = Self::default();
        store.state().unreachable = true;
        store
    }

    /// Make the next `begin` fail.
    pub fn fail_begin_once(&self) {
        self.state().fail_begin = true;
    }

    /// Make the insert of the row at `index` within the next transaction
    /// fail.
    pub fn fail_insert_at(&self, index: usize) {
        self.state().fail_insert_at = Some(index);
    }

    /// Make the next `commit` fail. Nothing of that batch is persisted.
    pub fn fail_commit_once(&self) {
        self.state().fail_commit = true;
    }

    /// Sleep this long inside every `insert`, to simulate a slow store.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.state().insert_delay = delay;
    }

    pub fn committed_batches(&self) -> Vec<Vec<LogRecord>> {
        self.state().committed.clone()
    }

    /// Every committed record, in commit order.
    pub fn committed_records(&self) -> Vec<LogRecord> {
        self.state().committed.iter().flatten().cloned().collect()
    }

    pub fn transactions_started(&self) -> usize {
        self.state().transactions_started
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn ping(&mut self) -> Result<(), StoreError> {
        if self.state().unreachable {
            return Err(StoreError::Unreachable("memory store marked unreachable".to_string()));
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_begin) {
            return Err(StoreError::Injected("begin"));
        }
        if state.staged.is_some() {
            return Err(StoreError::TransactionOpen);
        }
        state.staged = Some(Vec::new());
        state.transactions_started += 1;
        Ok(())
    }

    async fn insert(&mut self, record: &LogRecord) -> Result<(), StoreError> {
        let delay = self.state().insert_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let position = match &state.staged {
            Some(rows) => rows.len(),
            None => return Err(StoreError::NoTransaction),
        };
        if state.fail_insert_at == Some(position) {
            state.fail_insert_at = None;
            return Err(StoreError::Injected("insert"));
        }
        if let Some(rows) = state.staged.as_mut() {
            rows.push(record.clone());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut state = self.state();
        let rows = state.staged.take().ok_or(StoreError::NoTransaction)?;
        if std::mem::take(&mut state.fail_commit) {
            return Err(StoreError::Injected("commit"));
        }
        state.committed.push(rows);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.staged.take().is_some() {
            state.rollbacks += 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.state().closed = true;
        Ok(())
    }
}
