//! Environment variable names used by this crate for configuration of
//! sinks from services.
//!
//! These are purely helpers; the sink and store types never read the
//! environment themselves. See [`SinkConfig::from_env`].
//!
//! [`SinkConfig::from_env`]: crate::config::SinkConfig::from_env

/// Store DSN, e.g. `clickhouse://default@127.0.0.1:8123/default/tiered_logs`.
pub const LOG_SINK_DSN_ENV: &str = "LOG_SINK_DSN";

/// Number of records per batch.
pub const LOG_SINK_BATCH_SIZE_ENV: &str = "LOG_SINK_BATCH_SIZE";

/// `retain` (default) or `drop`.
pub const LOG_SINK_ON_FLUSH_ERROR_ENV: &str = "LOG_SINK_ON_FLUSH_ERROR";

/// Optional per-request deadline in milliseconds.
pub const LOG_SINK_REQUEST_TIMEOUT_MS_ENV: &str = "LOG_SINK_REQUEST_TIMEOUT_MS";

/// Optional user name, overrides the DSN. The name predates Postgres
/// support; the override applies to both stores.
pub const LOG_SINK_CLICKHOUSE_USER_ENV: &str = "LOG_SINK_CLICKHOUSE_USER";

/// Optional password, overrides the DSN for both stores.
pub const LOG_SINK_CLICKHOUSE_PASSWORD_ENV: &str = "LOG_SINK_CLICKHOUSE_PASSWORD";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
