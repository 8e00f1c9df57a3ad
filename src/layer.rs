use crate::record::{Level, LogRecord};
use crate::sink::{BatchingLogSink, SinkStats};
use crate::error::SinkError;
use crate::store::LogStore;
use chrono::Utc;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events are never shipped.
///
/// The sink and the HTTP/database clients below it emit events of their
/// own while flushing; shipping those would feed every flush back into
/// the buffer.
pub const DEFAULT_IGNORED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "reqwest",
    "h2",
    "rustls",
    "tokio_postgres",
    "tokio_util",
    "want",
];

/// Counters shared between the layer and its [`ShipperHandle`].
#[derive(Debug, Default)]
pub struct LayerCounters {
    /// Total events seen by the layer (before filtering).
    pub total_events: AtomicU64,
    /// Successfully enqueued into the channel.
    pub enqueued_events: AtomicU64,
    /// Dropped because the channel was full or already closed.
    pub dropped_events: AtomicU64,
}

/// Point-in-time copy of [`LayerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub total_events: u64,
    pub enqueued_events: u64,
    pub dropped_events: u64,
}

impl LayerCounters {
    pub fn snapshot(&self) -> LayerStats {
        LayerStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            enqueued_events: self.enqueued_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to a single task owning a [`BatchingLogSink`].
///
/// Any number of threads may emit events; the bounded channel serializes
/// them so the sink keeps its one-caller contract. The channel never
/// blocks the emitting thread: when it is full the record is dropped and
/// counted.
pub struct LogShippingLayer {
    sender: mpsc::Sender<LogRecord>,
    min_level: tracing::Level,
    ignored_targets: Vec<String>,
    counters: Arc<LayerCounters>,
}

/// Final state reported once the shipping task has stopped.
#[derive(Debug)]
pub struct ShutdownReport {
    pub sink: SinkStats,
    pub layer: LayerStats,
    /// Outcome of the final flush and connection release.
    pub result: Result<(), SinkError>,
}

/// Error returned by [`ShipperHandle::shutdown`].
#[derive(thiserror::Error, Debug)]
pub enum ShutdownError {
    #[error("log shipping task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// Owner-side handle of the shipping task.
///
/// Call [`shutdown`](Self::shutdown) before the process exits; it is the
/// final flush.
pub struct ShipperHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<(SinkStats, Result<(), SinkError>)>,
    counters: Arc<LayerCounters>,
}

impl ShipperHandle {
    pub fn layer_stats(&self) -> LayerStats {
        self.counters.snapshot()
    }

    /// Stop accepting records, append everything still queued, flush the
    /// remainder and close the store.
    pub async fn shutdown(self) -> Result<ShutdownReport, ShutdownError> {
        // The task may already be gone if the layer was dropped.
        let _ = self.stop.send(());
        let (sink, result) = self.task.await?;
        Ok(ShutdownReport {
            sink,
            layer: self.counters.snapshot(),
            result,
        })
    }
}

impl LogShippingLayer {
    /// Create a new layer and spawn the task that owns `sink`.
    ///
    /// Must be called from within a Tokio runtime. A `channel_buffer`
    /// below 16 is raised to 16.
    pub fn new<S>(
        sink: BatchingLogSink<S>,
        channel_buffer: usize,
        min_level: tracing::Level,
        ignored_targets: Vec<String>,
    ) -> (Self, ShipperHandle)
    where
        S: LogStore + 'static,
    {
        let (tx, rx) = mpsc::channel::<LogRecord>(channel_buffer.max(16));
        let (stop_tx, stop_rx) = oneshot::channel();
        let counters = Arc::new(LayerCounters::default());

        let task = tokio::spawn(run_sink(sink, rx, stop_rx));

        let layer = Self {
            sender: tx,
            min_level,
            ignored_targets,
            counters: Arc::clone(&counters),
        };
        let handle = ShipperHandle {
            stop: stop_tx,
            task,
            counters,
        };
        (layer, handle)
    }

    pub fn counters(&self) -> Arc<LayerCounters> {
        Arc::clone(&self.counters)
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|ignored| {
            target
                .strip_prefix(ignored.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

/// Body of the shipping task: the only caller of the sink.
async fn run_sink<S: LogStore>(
    mut sink: BatchingLogSink<S>,
    mut rx: mpsc::Receiver<LogRecord>,
    mut stop: oneshot::Receiver<()>,
) -> (SinkStats, Result<(), SinkError>) {
    loop {
        // Stop is polled first; a busy channel must not starve shutdown.
        tokio::select! {
            biased;
            _ = &mut stop => break,
            received = rx.recv() => match received {
                Some(record) => append(&mut sink, record).await,
                None => break,
            },
        }
    }

    // Drain what was queued before the stop signal.
    rx.close();
    while let Some(record) = rx.recv().await {
        append(&mut sink, record).await;
    }
    sink.shutdown().await
}

async fn append<S: LogStore>(sink: &mut BatchingLogSink<S>, record: LogRecord) {
    // Reported on stderr: a tracing event here would come straight back.
    if let Err(e) = sink.append(record).await {
        eprintln!("error shipping log batch: {}", e);
    }
}

impl<S> Layer<S> for LogShippingLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.counters.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.min_level || self.is_ignored(meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord::at(Utc::now(), Level::from(*meta.level()), visitor.finish());
        match self.sender.try_send(record) {
            Ok(()) => {
                self.counters.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

use tracing::field::{Field, Visit};

/// Renders an event as `message key=value key2="value two"`, so that
/// structured fields survive in the single `message` column.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
            self.push_field(field.name(), format_args!("{:?}", value));
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}
