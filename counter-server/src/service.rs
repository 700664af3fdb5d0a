//! Counter synchronization service.
//!
//! CounterService owns the authoritative counter state, the connection
//! registry and the persistence writer, and coordinates the three:
//!
//! ```text
//! client event ─► state lock ─► mutate ─► broadcast updateCounter
//!                                    └──► sync_counter (spawned, retried)
//!                                    └──► increment_visitors (spawned) ─► broadcast updateTotalVisitors
//! ```
//!
//! Every message for a client is queued while holding the state lock, so a
//! client sees counter updates in exactly the order they were applied.

use crate::config::Config;
use crate::error::{Result, ServiceError, StoreResult};
use crate::limits::RateLimits;
use crate::persist::PersistenceSync;
use crate::registry::{BroadcastReport, ClientReceiver, ConnectionRegistry};
use crate::state::{CounterState, Mutation};
use crate::store::{parse_counter, parse_visitors, CounterStore, COUNTER_KEY, VISITORS_KEY};
use counter_types::{ClientEvent, ConnectionId, ServerEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Operational metrics for monitoring counter activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    /// Total client connections accepted.
    pub connections_total: AtomicU64,
    /// Total increments applied.
    pub increments_total: AtomicU64,
    /// Total decrements applied.
    pub decrements_total: AtomicU64,
    /// Events dropped because the service was shutting down.
    pub events_rejected: AtomicU64,
    /// Events dropped by rate limiting.
    pub rate_limit_hits: AtomicU64,
    /// Frames that did not decode to a client event.
    pub invalid_messages: AtomicU64,
    /// Clients removed because their outbound queue was full or gone.
    pub clients_evicted: AtomicU64,
    /// Successful store writes.
    pub store_writes_total: AtomicU64,
    /// Failed store write attempts (first tries and retries).
    pub store_write_failures: AtomicU64,
    /// Retries scheduled after a failed first attempt.
    pub store_retries: AtomicU64,
    /// Writes abandoned after the retry failed.
    pub store_writes_dropped: AtomicU64,
    /// Counter writes skipped because a newer value was already submitted.
    pub store_writes_superseded: AtomicU64,
    /// Connect-time visitor snapshots that fell back to the in-memory value.
    pub visitor_snapshot_fallbacks: AtomicU64,
}

/// Main counter service.
pub struct CounterService {
    config: Config,
    /// Authoritative counter and visitor total. The only writer path.
    state: Mutex<CounterState>,
    registry: ConnectionRegistry,
    persist: PersistenceSync,
    rate_limits: RateLimits,
    metrics: Arc<CounterMetrics>,
    /// Cleared once shutdown begins; checked under the state lock.
    accepting: AtomicBool,
}

impl std::fmt::Debug for CounterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl CounterService {
    /// Create a service around an already loaded state.
    pub fn new(config: Config, store: Arc<dyn CounterStore>, initial: CounterState) -> Self {
        let metrics = Arc::new(CounterMetrics::default());
        let persist = PersistenceSync::new(store, &config.store, metrics.clone());
        let registry = ConnectionRegistry::new(&config.limits);
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            state: Mutex::new(initial),
            registry,
            persist,
            rate_limits,
            metrics,
            accepting: AtomicBool::new(true),
        }
    }

    /// Load the persisted state and create the service.
    ///
    /// Absent or unparseable values start at zero. A store that cannot be
    /// read is an error: the caller must not start serving clients.
    pub async fn load(config: Config, store: Arc<dyn CounterStore>) -> Result<Self> {
        let service = Self::new(config, store, CounterState::default());

        let counter = parse_counter(service.persist.read(COUNTER_KEY).await?.as_deref());
        let visitors = parse_visitors(service.persist.read(VISITORS_KEY).await?.as_deref());
        *service.state.lock().await = CounterState::new(counter, visitors);

        tracing::info!(
            "Counter loaded from store: {} (visitors: {})",
            counter,
            visitors
        );
        Ok(service)
    }

    /// Get the service configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the persistence writer.
    pub fn persist(&self) -> &PersistenceSync {
        &self.persist
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &CounterMetrics {
        &self.metrics
    }

    /// Whether client connections and mutations are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Current counter value.
    pub async fn current_value(&self) -> i64 {
        self.state.lock().await.current_value()
    }

    /// Last known visitor total.
    pub async fn current_visitors(&self) -> u64 {
        self.state.lock().await.current_visitors()
    }

    /// Admit a new client.
    ///
    /// The current counter is queued for the client before any later
    /// broadcast can reach it. The visitor snapshot follows from a spawned
    /// store read so a slow store never delays the connection.
    pub async fn connect(self: &Arc<Self>) -> Result<(ConnectionId, ClientReceiver)> {
        let (id, rx) = {
            let state = self.state.lock().await;
            if !self.is_accepting() {
                return Err(ServiceError::ShuttingDown);
            }
            let (id, rx) = self.registry.register()?;
            self.registry
                .send_to(&id, ServerEvent::UpdateCounter(state.current_value()));
            (id, rx)
        };

        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!("A user connected: {} (total: {})", id, self.registry.count());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.send_visitor_snapshot(id).await });

        Ok((id, rx))
    }

    /// Remove a client. Idempotent.
    pub fn disconnect(&self, id: &ConnectionId) {
        if self.registry.unregister(id) {
            tracing::info!(
                "A user disconnected: {} (remaining: {})",
                id,
                self.registry.count()
            );
        }
    }

    /// Apply one client event.
    ///
    /// Returns the applied mutation, or `None` for lifecycle events.
    pub async fn apply(
        self: &Arc<Self>,
        id: ConnectionId,
        event: ClientEvent,
    ) -> Result<Option<Mutation>> {
        if !event.is_mutation() {
            self.disconnect(&id);
            return Ok(None);
        }

        if let Err(e) = self.rate_limits.check_event(&id) {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropping {:?} from {}: {}", event, id, e);
            return Err(e.into());
        }

        let mutation = {
            let mut state = self.state.lock().await;
            if !self.is_accepting() {
                self.metrics.events_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ServiceError::ShuttingDown);
            }

            let mutation = match event {
                ClientEvent::Increment => state.increment(),
                _ => state.decrement(),
            };
            let report = self
                .registry
                .broadcast(ServerEvent::UpdateCounter(mutation.counter));
            self.record_broadcast(report);
            self.persist.sync_counter(mutation.counter);
            mutation
        };

        if mutation.visit {
            self.metrics.increments_total.fetch_add(1, Ordering::Relaxed);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Some(total) = this.persist.increment_visitors().await {
                    this.publish_visitors(total).await;
                }
            });
        } else {
            self.metrics.decrements_total.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!("{} applied {:?} -> {}", id, event, mutation.counter);
        Ok(Some(mutation))
    }

    /// Merge a store-reported visitor total and broadcast the result.
    pub async fn publish_visitors(&self, total: u64) {
        let mut state = self.state.lock().await;
        let visitors = state.observe_visitors(total);
        let report = self
            .registry
            .broadcast(ServerEvent::UpdateTotalVisitors(visitors));
        self.record_broadcast(report);
    }

    /// Stop accepting connections and mutations.
    ///
    /// Taking the state lock waits out any mutation already in progress.
    /// Returns the final counter value.
    pub async fn stop_accepting(&self) -> i64 {
        let state = self.state.lock().await;
        self.accepting.store(false, Ordering::SeqCst);
        state.current_value()
    }

    /// Write the final counter value and close the store.
    pub async fn close_store(&self, final_value: i64) -> StoreResult<()> {
        let flushed = self.persist.flush(final_value).await;
        if let Err(e) = &flushed {
            tracing::error!("Final counter flush failed: {}", e);
        }
        crate::store::with_timeout(
            "close",
            self.config.store.op_timeout(),
            self.persist.store().close(),
        )
        .await?;
        flushed
    }

    /// Disconnect every client. Returns how many were connected.
    pub fn close_clients(&self) -> usize {
        self.registry.close_all()
    }

    async fn send_visitor_snapshot(&self, id: ConnectionId) {
        let fetched = match self.persist.read(VISITORS_KEY).await {
            Ok(raw) => Some(parse_visitors(raw.as_deref())),
            Err(e) => {
                self.metrics
                    .visitor_snapshot_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Visitor snapshot for {} fell back to last known: {}", id, e);
                None
            }
        };

        let mut state = self.state.lock().await;
        let visitors = match fetched {
            Some(total) => state.observe_visitors(total),
            None => state.current_visitors(),
        };
        if !self
            .registry
            .send_to(&id, ServerEvent::UpdateTotalVisitors(visitors))
        {
            tracing::debug!("Visitor snapshot for {} not delivered", id);
        }
    }

    fn record_broadcast(&self, report: BroadcastReport) {
        if report.evicted > 0 {
            self.metrics
                .clients_evicted
                .fetch_add(report.evicted as u64, Ordering::Relaxed);
        }
    }
}
