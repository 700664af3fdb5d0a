//! Durable store layer for counter-server.
//!
//! A minimal key-value contract (`get`, `set`, atomic `incr`) with string
//! encoded values, so the counter survives process restarts.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Key holding the counter value.
pub const COUNTER_KEY: &str = "counter";

/// Key holding the cumulative visitor total (maintained with `incr`).
pub const VISITORS_KEY: &str = "total_visitors";

/// Trait for durable key-value backends.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a key. Returns `None` if the key was never written.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite a key.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Atomically add one to an integer key and return the new value.
    ///
    /// A missing key counts as zero. A key holding a non-integer fails with
    /// [`StoreError::NotAnInteger`] and is left untouched.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Release the underlying connection. Later calls fail.
    async fn close(&self) -> StoreResult<()>;
}

/// Open the backend named in the configuration.
pub async fn open(config: &StoreConfig) -> StoreResult<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Sqlite => {
            let store = SqliteStore::new(&config.database).await?;
            tracing::info!("Opened SQLite store at {}", config.database.display());
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store: counter will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Decode a stored counter. Absent or unparseable values read as zero.
pub fn parse_counter(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(0)
}

/// Decode a stored visitor total. Absent, unparseable or negative values
/// read as zero.
pub fn parse_visitors(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<u64>().ok()).unwrap_or(0)
}

/// Run a store call under a deadline.
pub async fn with_timeout<T, F>(op: &'static str, limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            op,
            after_ms: limit.as_millis() as u64,
        }),
    }
}
