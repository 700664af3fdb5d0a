//! Registry of connected clients.
//!
//! Each client is represented only by the sending half of its bounded
//! outbound queue. Publishing never awaits: a client whose queue is full is
//! evicted instead of slowing everybody else down. Dropping the sender is
//! what tells the session to close the socket.

use crate::config::LimitsConfig;
use crate::error::ServiceError;
use counter_types::{ConnectionId, ServerEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receiving half handed to the session that owns the socket.
pub type ClientReceiver = mpsc::Receiver<ServerEvent>;

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the event was queued for.
    pub delivered: usize,
    /// Clients removed because their queue was full or gone.
    pub evicted: usize,
}

/// Connected clients keyed by connection id.
pub struct ConnectionRegistry {
    clients: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    max_connections: usize,
    send_queue: usize,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("clients", &self.clients.len())
            .field("max_connections", &self.max_connections)
            .field("send_queue", &self.send_queue)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry sized from the limits configuration.
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            clients: DashMap::new(),
            max_connections: limits.max_connections,
            send_queue: limits.send_queue.max(1),
        }
    }

    /// Add a client. Fails once `max_connections` clients are registered.
    pub fn register(&self) -> Result<(ConnectionId, ClientReceiver), ServiceError> {
        if self.clients.len() >= self.max_connections {
            return Err(ServiceError::AtCapacity {
                limit: self.max_connections,
            });
        }
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(self.send_queue);
        self.clients.insert(id, tx);
        tracing::debug!("Registered {} (total: {})", id, self.clients.len());
        Ok((id, rx))
    }

    /// Remove a client. Returns whether it was still registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.clients.remove(id).is_some();
        if removed {
            tracing::debug!("Unregistered {} (remaining: {})", id, self.clients.len());
        }
        removed
    }

    /// Queue an event for one client.
    ///
    /// A client that cannot take the event is evicted and `false` returned.
    pub fn send_to(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        let outcome = match self.clients.get(id) {
            Some(tx) => tx.try_send(event),
            None => return false,
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                self.evict(id, &e);
                false
            }
        }
    }

    /// Queue an event for every client.
    pub fn broadcast(&self, event: ServerEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for entry in self.clients.iter() {
            match entry.value().try_send(event) {
                Ok(()) => report.delivered += 1,
                Err(e) => failed.push((*entry.key(), e)),
            }
        }

        // Removal must wait until the iterator's shard locks are released.
        for (id, e) in &failed {
            self.evict(id, e);
        }
        report.evicted = failed.len();
        report
    }

    /// Drop entries whose session has already gone away.
    pub fn prune_closed(&self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, tx| !tx.is_closed());
        before.saturating_sub(self.clients.len())
    }

    /// Remove every client, closing their queues.
    pub fn close_all(&self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Whether a client is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Whether no more clients can be registered.
    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_connections
    }

    fn evict(&self, id: &ConnectionId, reason: &TrySendError<ServerEvent>) {
        if self.clients.remove(id).is_some() {
            match reason {
                TrySendError::Full(_) => {
                    tracing::warn!("Evicting {}: outbound queue full", id)
                }
                TrySendError::Closed(_) => {
                    tracing::debug!("Dropping {}: session already closed", id)
                }
            }
        }
    }
}
