//! SQLite store backend for counter-server.

use super::CounterStore;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed key-value store.
///
/// Uses WAL mode for concurrent reads/writes. Values are stored as TEXT so
/// the on-disk format matches the string-encoded integers clients expect.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a store from a database path.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: every pooled connection would get its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        // The WHERE guard leaves non-integer values alone; no row comes back.
        let updated: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, '1')
            ON CONFLICT(key) DO UPDATE
                SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
                WHERE CAST(CAST(value AS INTEGER) AS TEXT) = value
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        match updated {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                value: raw,
            }),
            None => {
                let value = self.get(key).await?.unwrap_or_default();
                Err(StoreError::NotAnInteger {
                    key: key.to_string(),
                    value,
                })
            }
        }
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{COUNTER_KEY, VISITORS_KEY};

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get(COUNTER_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set(COUNTER_KEY, "5").await.unwrap();
        store.set(COUNTER_KEY, "-2").await.unwrap();
        assert_eq!(store.get(COUNTER_KEY).await.unwrap().as_deref(), Some("-2"));
    }

    #[tokio::test]
    async fn incr_starts_from_zero() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.incr(VISITORS_KEY).await.unwrap(), 1);
        assert_eq!(store.incr(VISITORS_KEY).await.unwrap(), 2);
        assert_eq!(
            store.get(VISITORS_KEY).await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn incr_continues_from_set_value() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set(VISITORS_KEY, "41").await.unwrap();
        assert_eq!(store.incr(VISITORS_KEY).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set(VISITORS_KEY, "many").await.unwrap();

        let err = store.incr(VISITORS_KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { ref value, .. } if value == "many"));
        // Untouched
        assert_eq!(
            store.get(VISITORS_KEY).await.unwrap().as_deref(),
            Some("many")
        );
    }

    #[tokio::test]
    async fn concurrent_incr_loses_no_updates() {
        let store = std::sync::Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.incr(VISITORS_KEY).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(
            store.get(VISITORS_KEY).await.unwrap().as_deref(),
            Some("20")
        );
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.set(COUNTER_KEY, "17").await.unwrap();
            store.close().await.unwrap();
        }

        let store = SqliteStore::new(&path).await.unwrap();
        assert_eq!(store.get(COUNTER_KEY).await.unwrap().as_deref(), Some("17"));
    }

    #[tokio::test]
    async fn calls_fail_after_close() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.close().await.unwrap();
        assert!(store.get(COUNTER_KEY).await.is_err());
        assert!(store.set(COUNTER_KEY, "1").await.is_err());
    }
}
