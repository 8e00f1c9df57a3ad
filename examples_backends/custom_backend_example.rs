use async_trait::async_trait;
use tracing::{error, info};
use tiered_log_sink::{
    init::init_tracing,
    BatchingLogSink, LogRecord, LogStore, StoreError,
};

/// Example of integrating a completely custom backend by implementing
/// the `LogStore` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// store.
#[derive(Default)]
struct MyCustomDbStore {
    pending: Option<Vec<String>>,
}

#[async_trait]
impl LogStore for MyCustomDbStore {
    async fn ping(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn insert(&mut self, record: &LogRecord) -> Result<(), StoreError> {
        let pending = self.pending.as_mut().ok_or(StoreError::NoTransaction)?;
        pending.push(format!("{} [{}] {}", record.timestamp(), record.level(), record.message()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        // Here you would call your own client library for the target DB.
        // For the sake of example we just print the batch.
        for row in self.pending.take().ok_or(StoreError::NoTransaction)? {
            println!("[my-custom-db] {}", row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.pending = None;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let sink = BatchingLogSink::with_store(MyCustomDbStore::default(), 2)
        .await
        .expect("custom store");
    let shipper = init_tracing(sink).expect("install subscriber");

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    shipper.shutdown().await.expect("shipping task").result.expect("final flush");
}
