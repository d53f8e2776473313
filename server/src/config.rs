//! Configuration management for the server.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use cartsync_engine::ResolutionStrategy;

use crate::sync::DEFAULT_QUEUE_CAPACITY;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    pub sync: SyncSettings,
}

/// Tuning of the sync core.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Entries kept per user in the offline queue
    pub offline_queue_capacity: usize,
    /// Deadline for committing a resolved cart
    pub commit_timeout: Duration,
    /// Connections silent for longer are dropped
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long a conflicted sync waits for `resolve_conflicts`
    pub pending_conflict_ttl: Duration,
    /// Strategy used when a client sets `autoResolve` without naming one
    pub auto_resolve_strategy: ResolutionStrategy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            offline_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            commit_timeout: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
            pending_conflict_ttl: Duration::from_secs(300),
            auto_resolve_strategy: ResolutionStrategy::LastWriteWins,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        Ok(Self {
            host,
            port,
            database_url,
            sync: SyncSettings::from_env()?,
        })
    }
}

impl SyncSettings {
    /// Load sync tuning, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            offline_queue_capacity: parse_var(
                "OFFLINE_QUEUE_CAPACITY",
                defaults.offline_queue_capacity,
            )?,
            commit_timeout: Duration::from_millis(parse_var(
                "COMMIT_TIMEOUT_MS",
                defaults.commit_timeout.as_millis() as u64,
            )?),
            heartbeat_timeout: Duration::from_secs(parse_var(
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(parse_var(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            pending_conflict_ttl: Duration::from_secs(parse_var(
                "PENDING_CONFLICT_TTL_SECS",
                defaults.pending_conflict_ttl.as_secs(),
            )?),
            auto_resolve_strategy: parse_var(
                "AUTO_RESOLVE_STRATEGY",
                defaults.auto_resolve_strategy,
            )?,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
