//! Background persistence of counter state.
//!
//! Writes never block the broadcast path: callers either spawn them
//! ([`PersistenceSync::sync_counter`]) or await them from a task of their own
//! ([`PersistenceSync::increment_visitors`]).
//!
//! ## Retry policy
//!
//! Every write gets one attempt plus exactly one retry after a fixed delay.
//! Both attempts run under the store call timeout. If the retry also fails
//! the write is logged and dropped; the next mutation submits a newer value
//! anyway, which is how the store catches up. The visitor `incr` is the one
//! exception: after a timeout it is not retried, since the first attempt may
//! already have counted the visit.
//!
//! Counter writes are stamped with a submission number and serialized on a
//! lock. A write (or retry) that finds a newer submission skips itself, so
//! the store can never be rolled back to an older value and a stalled store
//! only ever has one counter write waiting on it.

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::service::CounterMetrics;
use crate::store::{with_timeout, CounterStore, COUNTER_KEY, VISITORS_KEY};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Retrying writer in front of the durable store.
#[derive(Clone)]
pub struct PersistenceSync {
    store: Arc<dyn CounterStore>,
    op_timeout: Duration,
    retry_delay: Duration,
    metrics: Arc<CounterMetrics>,
    /// Number of the most recent counter submission.
    submitted: Arc<AtomicU64>,
    /// Serializes counter writes.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for PersistenceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSync")
            .field("op_timeout", &self.op_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PersistenceSync {
    /// Create a writer for the given store.
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: &StoreConfig,
        metrics: Arc<CounterMetrics>,
    ) -> Self {
        Self {
            store,
            op_timeout: config.op_timeout(),
            retry_delay: config.retry_delay(),
            metrics,
            submitted: Arc::new(AtomicU64::new(0)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The shared store handle.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Persist a counter value in the background.
    ///
    /// Submission order is the order of calls, so callers that care about
    /// ordering call this while still holding the state lock. The handle
    /// resolves to whether the value reached the store (or was superseded by
    /// a newer one that will); callers are free to drop it.
    pub fn sync_counter(&self, value: i64) -> JoinHandle<bool> {
        let seq = self.submit();
        let this = self.clone();
        tokio::spawn(async move { this.write_counter(seq, value).await })
    }

    /// Persist a counter value with an already assigned submission number,
    /// retrying once.
    async fn write_counter(&self, seq: u64, value: i64) -> bool {
        let encoded = value.to_string();
        self.write_with_retry("counter write", Retry::Always, || {
            self.write_counter_once(seq, &encoded)
        })
        .await
        .is_some()
    }

    async fn write_counter_once(&self, seq: u64, encoded: &str) -> StoreResult<Attempt<()>> {
        let _guard = self.write_lock.lock().await;
        if self.submitted.load(Ordering::SeqCst) != seq {
            self.metrics
                .store_writes_superseded
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Counter write #{} superseded, skipping", seq);
            return Ok(Attempt::Skipped);
        }
        with_timeout("set", self.op_timeout, self.store.set(COUNTER_KEY, encoded)).await?;
        Ok(Attempt::Applied(()))
    }

    fn submit(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Atomically bump the stored visitor total, retrying once.
    ///
    /// `incr` is not idempotent, so a timed out attempt is not retried: the
    /// store may have applied it and only the reply was lost.
    ///
    /// Returns the store's new total, or `None` if no attempt is known to
    /// have succeeded.
    pub async fn increment_visitors(&self) -> Option<u64> {
        let attempt = self
            .write_with_retry("visitor increment", Retry::UnlessAmbiguous, || async {
                with_timeout("incr", self.op_timeout, self.store.incr(VISITORS_KEY))
                    .await
                    .map(Attempt::Applied)
            })
            .await?;
        match attempt {
            Attempt::Applied(total) => Some(u64::try_from(total).unwrap_or(0)),
            Attempt::Skipped => None,
        }
    }

    /// Single timeout-bounded counter write, used on shutdown.
    ///
    /// Supersedes every pending counter write and retry.
    pub async fn flush(&self, value: i64) -> StoreResult<()> {
        let seq = self.submit();
        self.write_counter_once(seq, &value.to_string()).await?;
        Ok(())
    }

    /// Timeout-bounded read of a raw key.
    pub async fn read(&self, key: &str) -> StoreResult<Option<String>> {
        with_timeout("get", self.op_timeout, self.store.get(key)).await
    }

    async fn write_with_retry<T, F, Fut>(
        &self,
        what: &'static str,
        retry: Retry,
        op: F,
    ) -> Option<Attempt<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<Attempt<T>>>,
    {
        let m = &self.metrics;

        match op().await {
            Ok(attempt) => {
                if let Attempt::Applied(_) = attempt {
                    m.store_writes_total.fetch_add(1, Ordering::Relaxed);
                }
                return Some(attempt);
            }
            Err(e) if retry == Retry::UnlessAmbiguous && e.may_have_applied() => {
                m.store_write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{} outcome unknown, not retrying: {}", what, e);
                return None;
            }
            Err(e) => {
                m.store_write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "{} failed, retrying in {}ms: {}",
                    what,
                    self.retry_delay.as_millis(),
                    e
                );
            }
        }

        tokio::time::sleep(self.retry_delay).await;
        m.store_retries.fetch_add(1, Ordering::Relaxed);

        match op().await {
            Ok(Attempt::Applied(value)) => {
                m.store_writes_total.fetch_add(1, Ordering::Relaxed);
                tracing::info!("{} succeeded on retry", what);
                Some(Attempt::Applied(value))
            }
            Ok(Attempt::Skipped) => Some(Attempt::Skipped),
            Err(e) => {
                m.store_write_failures.fetch_add(1, Ordering::Relaxed);
                m.store_writes_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{} failed after retry, dropping: {}", what, e);
                None
            }
        }
    }
}

/// Outcome of a write attempt that did not fail.
enum Attempt<T> {
    /// The store applied the write.
    Applied(T),
    /// A newer submission made this write pointless.
    Skipped,
}

/// Which failures may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Any failure. For writes that are safe to repeat.
    Always,
    /// Only failures the store definitely did not apply.
    UnlessAmbiguous,
}
