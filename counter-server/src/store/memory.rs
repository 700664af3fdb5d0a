//! In-process store backend.
//!
//! Holds values in a `DashMap`. Besides `backend = "memory"` runs it doubles
//! as the fault-injection store for tests: writes can be made to fail, the
//! whole store can be taken offline, or every call can be made to hang.

use super::CounterStore;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Map-backed store with fault injection switches.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, String>,
    /// Number of upcoming writes (`set`/`incr`) that fail.
    failing_writes: AtomicU32,
    /// Every call fails while set.
    offline: AtomicBool,
    /// Every call hangs while set.
    stalled: AtomicBool,
    /// Writes are applied but their reply hangs while set.
    lagging: AtomicBool,
    closed: AtomicBool,
    /// Total write attempts, failed or not.
    write_attempts: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with key/value pairs.
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        for (key, value) in values {
            store.data.insert(key.to_string(), value.to_string());
        }
        store
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Take the store offline (every call fails) or bring it back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every call hang until cleared.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Apply writes but never answer them until cleared.
    pub fn set_lagging(&self, lagging: bool) {
        self.lagging.store(lagging, Ordering::SeqCst);
    }

    /// Number of write attempts seen so far.
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Read a value without going through the fault switches.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.value().clone())
    }

    async fn check_available(&self) -> StoreResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    async fn begin_write(&self) -> StoreResult<()> {
        self.check_available().await?;
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    async fn finish_write(&self) {
        if self.lagging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available().await?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.begin_write().await?;
        self.data.insert(key.to_string(), value.to_string());
        self.finish_write().await;
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.begin_write().await?;
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
            value: entry.value().clone(),
        })?;
        let next = current.saturating_add(1);
        *entry = next.to_string();
        drop(entry);
        self.finish_write().await;
        Ok(next)
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{COUNTER_KEY, VISITORS_KEY};
    use std::time::Duration;

    #[tokio::test]
    async fn set_get_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.get(COUNTER_KEY).await.unwrap(), None);

        store.set(COUNTER_KEY, "4").await.unwrap();
        assert_eq!(store.get(COUNTER_KEY).await.unwrap().as_deref(), Some("4"));

        assert_eq!(store.incr(VISITORS_KEY).await.unwrap(), 1);
        assert_eq!(store.incr(VISITORS_KEY).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer() {
        let store = MemoryStore::with_values([(VISITORS_KEY, "lots")]);
        assert!(matches!(
            store.incr(VISITORS_KEY).await,
            Err(StoreError::NotAnInteger { .. })
        ));
        assert_eq!(store.peek(VISITORS_KEY).as_deref(), Some("lots"));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_writes(2);

        assert!(store.set(COUNTER_KEY, "1").await.is_err());
        assert!(store.incr(VISITORS_KEY).await.is_err());
        store.set(COUNTER_KEY, "2").await.unwrap();

        assert_eq!(store.peek(COUNTER_KEY).as_deref(), Some("2"));
        assert_eq!(store.peek(VISITORS_KEY), None);
        assert_eq!(store.write_attempts(), 3);
    }

    #[tokio::test]
    async fn offline_fails_reads_and_writes() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get(COUNTER_KEY).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.set(COUNTER_KEY, "1").await.is_err());

        store.set_offline(false);
        store.set(COUNTER_KEY, "1").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_hangs() {
        let store = MemoryStore::new();
        store.set_stalled(true);
        let result = tokio::time::timeout(Duration::from_secs(1), store.get(COUNTER_KEY)).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_store_applies_before_hanging() {
        let store = MemoryStore::new();
        store.set_lagging(true);
        let result = tokio::time::timeout(Duration::from_secs(1), store.incr(VISITORS_KEY)).await;
        assert!(result.is_err());
        assert_eq!(store.peek(VISITORS_KEY).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get(COUNTER_KEY).await, Err(StoreError::Closed)));
    }
}
