//! Rate limiting for counter events.
//!
//! Protects the single writer from event floods. Two layers, both backed by
//! the governor crate:
//! - per connection, keyed by [`ConnectionId`]
//! - global, across all connections
//!
//! Over-quota events are dropped by the caller. Clients never receive an
//! error for them.

use crate::config::LimitsConfig;
use counter_types::ConnectionId;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the counter service.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits counter events per connection.
    ///
    /// Configured via `limits.events_per_minute`.
    event_limiter: Arc<KeyedLimiter<ConnectionId>>,

    /// Caps aggregate event throughput even if every client is within its
    /// own quota.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("event_limiter", &"KeyedLimiter<ConnectionId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero quotas are rejected by [`crate::config::Config::validate`]; should
    /// one slip through it is treated as a quota of one.
    pub fn new(config: &LimitsConfig) -> Self {
        let per_minute = NonZeroU32::new(config.events_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps =
            NonZeroU32::new(config.global_events_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            event_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check whether a counter event from this connection may proceed.
    ///
    /// The global quota is checked first so a rejected event does not also
    /// burn the connection's own quota.
    pub fn check_event(&self, id: &ConnectionId) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)?;
        self.event_limiter
            .check_key(id)
            .map_err(|_| RateLimitError::EventLimitExceeded)
    }

    /// Number of tracked connection keys (for metrics).
    pub fn tracked_keys(&self) -> usize {
        self.event_limiter.len()
    }

    /// Evict entries whose quota has fully recharged.
    ///
    /// Closed connections leave their key behind; the sweeper calls this
    /// periodically.
    pub fn shrink(&self) {
        self.event_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many events from this connection.
    #[error("event rate limit exceeded")]
    EventLimitExceeded,
    /// Too many events across all connections.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
