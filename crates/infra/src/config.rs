//! Configuration loading and representation.
//!
//! Everything comes from environment variables with defaults suitable for a
//! local run. [`Config::from_lookup`] takes any key lookup so tests never
//! touch the process environment.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

use crate::queue::{DEFAULT_QUEUE_CAPACITY, OverflowPolicy};
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, ReconcileBackoff, RetryPolicy};

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Upstream platform connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Bound on every upstream request, connect included.
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Postgres connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Full connection URL; overrides the individual parts when set.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            database: "shared".to_string(),
            username: "shared".to_string(),
            password: String::new(),
            url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url);
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .database(&self.database)
            .username(&self.username);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Work queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Reconciliation loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub backoff: ReconcileBackoff,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            backoff: ReconcileBackoff::default(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    pub reconcile: ReconcileConfig,
    pub bind_addr: String,
    /// Skip Postgres and keep everything in memory (dev only).
    pub use_in_memory_store: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            reconcile: ReconcileConfig::default(),
            bind_addr: "0.0.0.0:5002".to_string(),
            use_in_memory_store: false,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let upstream = UpstreamConfig {
            base_url: get("EXPENZY_API_BASE_URL").unwrap_or(defaults.upstream.base_url),
            timeout: secs(&get, "UPSTREAM_TIMEOUT_SECS", defaults.upstream.timeout)?,
        };

        let database = DatabaseConfig {
            host: get("DB_HOSTNAME").unwrap_or(defaults.database.host),
            database: get("DB_DATABASE").unwrap_or(defaults.database.database),
            username: get("DB_USERNAME").unwrap_or(defaults.database.username),
            password: lookup("DB_PASSWORD").unwrap_or(defaults.database.password),
            url: get("DATABASE_URL"),
            max_connections: parsed(
                &get,
                "DB_MAX_CONNECTIONS",
                "a positive integer",
                defaults.database.max_connections,
            )?,
            acquire_timeout: secs(&get, "DB_ACQUIRE_TIMEOUT_SECS", defaults.database.acquire_timeout)?,
        };

        let queue = QueueConfig {
            capacity: parsed(&get, "QUEUE_SIZE", "a positive integer", DEFAULT_QUEUE_CAPACITY)?,
            overflow: match get("QUEUE_OVERFLOW") {
                None => OverflowPolicy::Block,
                Some(v) => parse_overflow(&v)?,
            },
        };

        let retry = RetryPolicy {
            max_retries: parsed(&get, "MAX_RETRIES", "a non-negative integer", DEFAULT_MAX_RETRIES)?,
            base_delay: secs(&get, "RETRY_BASE_DELAY_SECS", DEFAULT_BASE_DELAY)?,
        };

        let reconcile = ReconcileConfig {
            interval: secs(&get, "RECONCILE_INTERVAL_SECS", defaults.reconcile.interval)?,
            backoff: ReconcileBackoff {
                base: secs(&get, "RECONCILE_BACKOFF_SECS", defaults.reconcile.backoff.base)?,
                max: secs(&get, "RECONCILE_BACKOFF_MAX_SECS", defaults.reconcile.backoff.max)?,
            },
        };

        let config = Config {
            upstream,
            database,
            queue,
            retry,
            reconcile,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_in_memory_store: flag(&get, "USE_IN_MEMORY_STORE")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(invalid("QUEUE_SIZE", "a positive integer", "0"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "a positive integer", "0"));
        }
        if self.reconcile.interval.is_zero() {
            return Err(invalid("RECONCILE_INTERVAL_SECS", "a positive number of seconds", "0"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, expected: &'static str, value: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        expected,
        value: value.into(),
    }
}

fn parsed<G, T>(get: &G, key: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| invalid(key, expected, v)),
    }
}

fn secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .ok_or_else(|| invalid(key, "a non-negative number of seconds", v)),
    }
}

fn flag<G>(get: &G, key: &'static str) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, "a boolean", v)),
        },
    }
}

fn parse_overflow(value: &str) -> Result<OverflowPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "block" => Ok(OverflowPolicy::Block),
        "reject" => Ok(OverflowPolicy::Reject),
        _ => Err(invalid("QUEUE_OVERFLOW", "one of: block, reject", value)),
    }
}
