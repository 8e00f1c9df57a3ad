use crate::layer::{LogShippingLayer, ShipperHandle, DEFAULT_IGNORED_TARGETS};
use crate::sink::BatchingLogSink;
use crate::store::LogStore;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration of the log shipping layer.
///
/// **Fields**
/// - `channel_buffer`: maximum number of records queued for the sink
///   before new ones are dropped.
/// - `min_level`: least severe level that is shipped.
/// - `ignored_targets`: event targets (and their submodules) that are
///   never shipped.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer is
///   added as well, filtered by `RUST_LOG` (default `info`).
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub min_level: tracing::Level,
    pub ignored_targets: Vec<String>,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            min_level: tracing::Level::INFO,
            ignored_targets: DEFAULT_IGNORED_TARGETS.iter().map(|t| t.to_string()).collect(),
            enable_stdout: true,
        }
    }
}

/// Error returned when the global subscriber cannot be installed.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed: {0}")]
    GlobalDefault(#[from] SetGlobalDefaultError),
}

/// Install the log shipping layer as part of the global `tracing`
/// subscriber.
///
/// **Parameters**
/// - `sink`: connected [`BatchingLogSink`]; it moves into the shipping
///   task and is only touched from there.
/// - `config`: [`LayerConfig`] controlling the channel and filtering.
///
/// **Returns**
/// - the [`ShipperHandle`] whose `shutdown` performs the final flush.
/// - [`InitError`] if another global subscriber was already set.
///
/// Must be called from within a Tokio runtime.
pub fn init_tracing_with_config<S>(
    sink: BatchingLogSink<S>,
    config: LayerConfig,
) -> Result<ShipperHandle, InitError>
where
    S: LogStore + 'static,
{
    let (layer, handle) = LogShippingLayer::new(
        sink,
        config.channel_buffer,
        config.min_level,
        config.ignored_targets,
    );

    // Both variants are built separately because the subscriber types
    // differ.
    if config.enable_stdout {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_filter(filter);
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(handle)
}

/// Initialize tracing with [`LayerConfig::default`].
///
/// This is the recommended entrypoint for typical services.
pub fn init_tracing<S>(sink: BatchingLogSink<S>) -> Result<ShipperHandle, InitError>
where
    S: LogStore + 'static,
{
    init_tracing_with_config(sink, LayerConfig::default())
}
