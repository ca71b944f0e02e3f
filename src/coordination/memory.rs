//! Shared in-memory TTL storage for the lock, semaphore, and cache adapters.
//!
//! A background sweep task drains expired entries on a fixed interval,
//! grounded in `telemetry::sinks::NonBlockingSink`'s worker-loop shape (a
//! `tokio::spawn`ed task consuming a channel or, here, ticking on an
//! interval). The primitive contract only requires expiration to be
//! correct on read (`with_entry` evicts lazily), so the sweep exists purely
//! to bound memory use between reads, not for correctness.

use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct TtlEntry<V> {
    pub value: V,
    pub expires_at_millis: Option<u64>,
}

pub(crate) struct TtlMap<V> {
    entries: Mutex<HashMap<String, TtlEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> TtlMap<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    fn expired(expires_at_millis: Option<u64>, now: u64) -> bool {
        matches!(expires_at_millis, Some(exp) if exp <= now)
    }

    pub fn ttl_to_expiration(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|d| self.clock.now_millis() + d.as_millis() as u64)
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Runs `f` against the live (non-expired) entry at `key`, evicting it
    /// first if it has expired. `f` receives `None` for an absent or just-
    /// evicted key.
    pub fn with_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut TtlEntry<V>>) -> R) -> R {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = guard.get(key) {
            if Self::expired(entry.expires_at_millis, now) {
                guard.remove(key);
            }
        }
        f(guard.get_mut(key))
    }

    pub fn insert(&self, key: impl Into<String>, value: V, expires_at_millis: Option<u64>) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(key.into(), TtlEntry { value, expires_at_millis });
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let now = self.clock.now_millis();
        match guard.get(key) {
            Some(entry) if Self::expired(entry.expires_at_millis, now) => {
                guard.remove(key);
                None
            }
            Some(_) => guard.remove(key).map(|e| e.value),
            None => None,
        }
    }

    pub fn contains_key_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.clock.now_millis();
        let guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !Self::expired(e.expires_at_millis, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Evict every expired entry now; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let before = guard.len();
        guard.retain(|_, entry| !Self::expired(entry.expires_at_millis, now));
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns a background task that sweeps `map` on a fixed interval. Returns a
/// handle the caller can drop to stop sweeping (the task is aborted with it
/// via the returned `JoinHandle`'s `AbortOnDropHandle`-style wrapper).
pub(crate) fn spawn_sweeper<V>(map: Arc<TtlMap<V>>, interval: Duration) -> tokio::task::JoinHandle<()>
where
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            map.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn with_entry_evicts_expired_before_calling_f() {
        let clock = Arc::new(ManualClock::new());
        let map: TtlMap<String> = TtlMap::new(clock.clone());
        map.insert("k", "v".to_string(), Some(100));
        clock.set(200);
        let seen = map.with_entry("k", |entry| entry.is_some());
        assert!(!seen);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let clock = Arc::new(ManualClock::new());
        let map: TtlMap<i32> = TtlMap::new(clock);
        map.insert("k", 7, None);
        assert_eq!(map.remove("k"), Some(7));
        assert_eq!(map.remove("k"), None);
    }

    #[test]
    fn sweep_expired_removes_only_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let map: TtlMap<i32> = TtlMap::new(clock.clone());
        map.insert("expired", 1, Some(50));
        map.insert("fresh", 2, Some(500));
        clock.set(100);
        let removed = map.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn key_prefix_lookup_skips_expired() {
        let clock = Arc::new(ManualClock::new());
        let map: TtlMap<i32> = TtlMap::new(clock.clone());
        map.insert("orders:1", 1, None);
        map.insert("orders:2", 2, Some(10));
        clock.set(20);
        let matches = map.contains_key_prefix("orders:");
        assert_eq!(matches, vec!["orders:1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_evicts_on_tick() {
        let clock = Arc::new(ManualClock::new());
        let map = Arc::new(TtlMap::<i32>::new(clock.clone()));
        map.insert("k", 1, Some(1));
        clock.set(10);
        let handle = spawn_sweeper(map.clone(), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;
        assert_eq!(map.len(), 0);
        handle.abort();
    }
}
