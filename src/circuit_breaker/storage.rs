//! Shared circuit breaker state storage.
//!
//! One entry per key, guarded by a single `std::sync::Mutex`-wrapped map —
//! the natural generalization of the teacher's per-breaker atomics once
//! policies carry heterogeneous metrics that no longer fit in one `AtomicU8`.

use super::CircuitBreakerState;
use std::collections::HashMap;
use std::sync::Mutex;

/// Entry tracked per circuit breaker key. `M` is the policy's metrics type.
#[derive(Debug, Clone)]
pub struct Entry<M> {
    pub state: CircuitBreakerState,
    pub metrics: M,
    /// Milliseconds (provider clock) at which the breaker last opened.
    pub opened_at_millis: u64,
    pub half_open_calls: usize,
    /// Consecutive half-open probe successes seen since the last half-open entry.
    pub half_open_successes: usize,
}

impl<M> Entry<M> {
    pub fn new(metrics: M) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            metrics,
            opened_at_millis: 0,
            half_open_calls: 0,
            half_open_successes: 0,
        }
    }
}

/// Storage contract for circuit breaker state, keyed by an opaque string key.
///
/// `atomic_update` is the single write path: callers pass a closure that
/// inspects-and-replaces the entry under the map's lock, so read-modify-write
/// races between concurrent callers on the same key cannot interleave.
pub trait CircuitBreakerStorage<M>: Send + Sync
where
    M: Clone + Send + Sync + 'static,
{
    fn atomic_update<F, R>(&self, key: &str, init: impl FnOnce() -> M, f: F) -> R
    where
        F: FnOnce(&mut Entry<M>) -> R;

    fn snapshot(&self, key: &str) -> Option<Entry<M>>;

    /// Force a key back to closed with fresh metrics, clearing isolation.
    fn reset(&self, key: &str, init: impl FnOnce() -> M);

    /// Manually latch a key open until the next `reset`.
    fn isolate(&self, key: &str, init: impl FnOnce() -> M);
}

/// In-memory, mutex-guarded map implementation.
#[derive(Debug, Default)]
pub struct InMemoryCircuitBreakerStorage<M> {
    entries: Mutex<HashMap<String, Entry<M>>>,
}

impl<M> InMemoryCircuitBreakerStorage<M> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<M> CircuitBreakerStorage<M> for InMemoryCircuitBreakerStorage<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn atomic_update<F, R>(&self, key: &str, init: impl FnOnce() -> M, f: F) -> R
    where
        F: FnOnce(&mut Entry<M>) -> R,
    {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.entry(key.to_string()).or_insert_with(|| Entry::new(init()));
        f(entry)
    }

    fn snapshot(&self, key: &str) -> Option<Entry<M>> {
        let guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(key).cloned()
    }

    fn reset(&self, key: &str, init: impl FnOnce() -> M) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(key.to_string(), Entry::new(init()));
    }

    fn isolate(&self, key: &str, init: impl FnOnce() -> M) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.entry(key.to_string()).or_insert_with(|| Entry::new(init()));
        entry.state = CircuitBreakerState::Isolated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_update_creates_entry_on_first_access() {
        let storage: InMemoryCircuitBreakerStorage<usize> = InMemoryCircuitBreakerStorage::new();
        let result = storage.atomic_update("k1", || 0usize, |entry| {
            entry.metrics += 1;
            entry.metrics
        });
        assert_eq!(result, 1);
        assert_eq!(storage.snapshot("k1").unwrap().metrics, 1);
    }

    #[test]
    fn isolate_latches_state_regardless_of_metrics() {
        let storage: InMemoryCircuitBreakerStorage<usize> = InMemoryCircuitBreakerStorage::new();
        storage.isolate("k1", || 0usize);
        assert_eq!(storage.snapshot("k1").unwrap().state, CircuitBreakerState::Isolated);
    }

    #[test]
    fn reset_clears_isolation_and_metrics() {
        let storage: InMemoryCircuitBreakerStorage<usize> = InMemoryCircuitBreakerStorage::new();
        storage.isolate("k1", || 5usize);
        storage.reset("k1", || 0usize);
        let snap = storage.snapshot("k1").unwrap();
        assert_eq!(snap.state, CircuitBreakerState::Closed);
        assert_eq!(snap.metrics, 0);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let storage: InMemoryCircuitBreakerStorage<usize> = InMemoryCircuitBreakerStorage::new();
        storage.atomic_update("a", || 0usize, |e| e.metrics += 1);
        storage.atomic_update("b", || 0usize, |e| e.metrics += 10);
        assert_eq!(storage.snapshot("a").unwrap().metrics, 1);
        assert_eq!(storage.snapshot("b").unwrap().metrics, 10);
    }
}
