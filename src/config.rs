use crate::env::*;
use crate::sink::FlushFailurePolicy;
use std::time::Duration;

pub const DEFAULT_DSN: &str = "clickhouse://default@localhost:8123/default/tiered_logs";
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Everything needed to build a [`BatchingLogSink`] from a DSN.
///
/// [`BatchingLogSink`]: crate::sink::BatchingLogSink
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    pub dsn: String,
    pub batch_size: usize,
    pub on_flush_error: FlushFailurePolicy,
    /// Deadline for each store request. Only honored by stores that talk
    /// HTTP; `None` means no deadline.
    pub request_timeout: Option<Duration>,
    /// Overrides the user from the DSN (ClickHouse and Postgres).
    pub user: Option<String>,
    /// Overrides the password from the DSN (ClickHouse and Postgres).
    pub password: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dsn: DEFAULT_DSN.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            on_flush_error: FlushFailurePolicy::default(),
            request_timeout: None,
            user: None,
            password: None,
        }
    }
}

/// Error returned when an environment variable holds an unusable value.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

impl SinkConfig {
    /// Build a configuration from the `LOG_SINK_*` variables, using
    /// defaults for the ones that are unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SinkConfig::default();

        if let Some(dsn) = lookup(LOG_SINK_DSN_ENV) {
            config.dsn = dsn;
        }
        if let Some(raw) = lookup(LOG_SINK_BATCH_SIZE_ENV) {
            config.batch_size = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid(LOG_SINK_BATCH_SIZE_ENV, raw)),
            };
        }
        if let Some(raw) = lookup(LOG_SINK_ON_FLUSH_ERROR_ENV) {
            config.on_flush_error = raw
                .parse()
                .map_err(|_| invalid(LOG_SINK_ON_FLUSH_ERROR_ENV, raw.clone()))?;
        }
        if let Some(raw) = lookup(LOG_SINK_REQUEST_TIMEOUT_MS_ENV) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(LOG_SINK_REQUEST_TIMEOUT_MS_ENV, raw.clone()))?;
            config.request_timeout = Some(Duration::from_millis(millis));
        }
        config.user = lookup(LOG_SINK_CLICKHOUSE_USER_ENV).filter(|s| !s.is_empty());
        config.password = lookup(LOG_SINK_CLICKHOUSE_PASSWORD_ENV).filter(|s| !s.is_empty());

        Ok(config)
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::InvalidValue { key, value }
}
