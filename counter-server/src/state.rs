//! Authoritative in-memory counter state.
//!
//! [`CounterState`] is a plain struct; the service wraps it in a mutex so all
//! mutations go through one writer at a time. Nothing here touches the store
//! or the network.

/// Outcome of one applied mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    /// Counter value after the mutation.
    pub counter: i64,
    /// Whether a visitor increment must be persisted for this mutation.
    pub visit: bool,
}

/// Counter value and visitor total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterState {
    counter: i64,
    visitors: u64,
}

impl CounterState {
    /// Start from values loaded from the store.
    pub fn new(counter: i64, visitors: u64) -> Self {
        Self { counter, visitors }
    }

    /// Add one to the counter and count one visit.
    pub fn increment(&mut self) -> Mutation {
        self.counter = self.counter.saturating_add(1);
        self.visitors = self.visitors.saturating_add(1);
        Mutation {
            counter: self.counter,
            visit: true,
        }
    }

    /// Subtract one from the counter. Visits are unaffected.
    pub fn decrement(&mut self) -> Mutation {
        self.counter = self.counter.saturating_sub(1);
        Mutation {
            counter: self.counter,
            visit: false,
        }
    }

    /// Current counter value.
    pub fn current_value(&self) -> i64 {
        self.counter
    }

    /// Last known visitor total.
    pub fn current_visitors(&self) -> u64 {
        self.visitors
    }

    /// Merge a total reported by the store. The local total never goes down,
    /// so a slow store reply cannot roll back what clients have already seen.
    pub fn observe_visitors(&mut self, total: u64) -> u64 {
        self.visitors = self.visitors.max(total);
        self.visitors
    }
}
