//! Configuration loading for counter-server.
//!
//! Configuration is loaded from a TOML file (default: `counter.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for counter-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Durable store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Connection and rate limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Sweeper task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:5492).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Hard deadline for the graceful shutdown sequence (default: 5).
    /// Past it the process exits with a failure status.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Which durable store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite file at `store.database`.
    Sqlite,
    /// Process-local map; nothing survives a restart.
    Memory,
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend selection (default: sqlite).
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Timeout for a single store call in milliseconds (default: 2000).
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// Delay before the single retry of a failed write (default: 5000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Connection and rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrently connected clients (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound queue depth per client (default: 64).
    /// A client whose queue fills up is disconnected.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
    /// Maximum counter events per connection per minute (default: 600).
    #[serde(default = "default_events_per_minute")]
    pub events_per_minute: u32,
    /// Maximum counter events per second across all connections (default: 1000).
    #[serde(default = "default_global_events_per_second")]
    pub global_events_per_second: u32,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Entry page served at `/`. The embedded page is used when unset.
    pub static_page: Option<PathBuf>,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Sweeper task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable sweeper task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:5492".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_database_path() -> PathBuf {
    PathBuf::from("counter.db")
}

fn default_op_timeout_ms() -> u64 {
    2000
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_send_queue() -> usize {
    64
}

fn default_events_per_minute() -> u32 {
    600
}

fn default_global_events_per_second() -> u32 {
    1000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database: default_database_path(),
            op_timeout_ms: default_op_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            send_queue: default_send_queue(),
            events_per_minute: default_events_per_minute(),
            global_events_per_second: default_global_events_per_second(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            static_page: None,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl StoreConfig {
    /// Per-call store timeout.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Delay before retrying a failed write.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl ServerConfig {
    /// Force-exit window for graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a limit
    /// is zero.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 5] = [
            ("limits.max_connections", self.limits.max_connections as u64),
            ("limits.send_queue", self.limits.send_queue as u64),
            ("limits.events_per_minute", self.limits.events_per_minute as u64),
            (
                "limits.global_events_per_second",
                self.limits.global_events_per_second as u64,
            ),
            ("store.op_timeout_ms", self.store.op_timeout_ms),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
