//! Distributed cache/counter primitive: get/put/CAS/increment over TTL'd
//! entries, with lazy expiration on read (§3.5).

use super::memory::{spawn_sweeper, TtlMap};
use crate::clock::{Clock, MonotonicClock};
use crate::event_bus::EventBus;
use crate::namespace::{Key, Namespace, NamespaceError};
use async_trait::async_trait;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const CACHE_HIT: &str = "CACHE_HIT";
pub const CACHE_MISS: &str = "CACHE_MISS";
pub const CACHE_WRITTEN: &str = "CACHE_WRITTEN";
pub const CACHE_UPDATED: &str = "CACHE_UPDATED";
pub const CACHE_REMOVED: &str = "CACHE_REMOVED";
pub const CACHE_CLEARED: &str = "CACHE_CLEARED";

#[derive(Debug, Clone)]
pub struct CacheEventPayload {
    pub key: String,
}

pub type CacheEventBus = EventBus<CacheEventPayload>;

/// A counter increment/decrement was attempted on a non-integer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementError;

impl fmt::Display for IncrementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value at key is not integer-typed")
    }
}

impl std::error::Error for IncrementError {}

#[async_trait]
pub trait CacheAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;
    async fn get_and_remove(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;
    /// Succeeds iff absent.
    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, Self::Error>;
    /// Replace-or-add; `true` if it replaced an existing value.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, Self::Error>;
    /// Only if present.
    async fn update(&self, key: &str, value: Vec<u8>) -> Result<bool, Self::Error>;
    async fn remove(&self, key: &str) -> Result<bool, Self::Error>;
    async fn remove_many(&self, keys: &[String]) -> Result<bool, Self::Error>;
    async fn remove_all(&self) -> Result<(), Self::Error>;
    async fn remove_by_key_prefix(&self, prefix: &str) -> Result<usize, Self::Error>;
    /// Atomic; `Ok(Err(IncrementError))` if the stored value is non-integer.
    async fn increment(&self, key: &str, delta: i64) -> Result<Result<i64, IncrementError>, Self::Error>;
}

/// In-memory [`CacheAdapter`], TTL-swept in the background.
pub struct InMemoryCacheAdapter {
    store: Arc<TtlMap<Vec<u8>>>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl InMemoryCacheAdapter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(TtlMap::new(clock));
        let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(60));
        Self { store, _sweeper: sweeper }
    }
}

impl Default for InMemoryCacheAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryCacheAdapter {
    fn drop(&mut self) {
        self._sweeper.abort();
    }
}

fn parse_integer(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse::<i64>().ok()
}

#[async_trait]
impl CacheAdapter for InMemoryCacheAdapter {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.store.with_entry(key, |entry| entry.map(|e| e.value.clone())))
    }

    async fn get_and_remove(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let present = self.store.with_entry(key, |entry| entry.is_some());
        Ok(if present { self.store.remove(key) } else { None })
    }

    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = self.store.ttl_to_expiration(ttl);
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(_) => false,
            None => {
                self.store.insert(key, value, expiration);
                true
            }
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = self.store.ttl_to_expiration(ttl);
        let replaced = self.store.with_entry(key, |entry| entry.is_some());
        self.store.insert(key, value, expiration);
        Ok(replaced)
    }

    async fn update(&self, key: &str, value: Vec<u8>) -> Result<bool, Self::Error> {
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(e) => {
                e.value = value;
                true
            }
            None => false,
        }))
    }

    async fn remove(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.store.remove(key).is_some())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<bool, Self::Error> {
        let mut any = false;
        for key in keys {
            if self.store.remove(key).is_some() {
                any = true;
            }
        }
        Ok(any)
    }

    async fn remove_all(&self) -> Result<(), Self::Error> {
        self.store.clear();
        Ok(())
    }

    async fn remove_by_key_prefix(&self, prefix: &str) -> Result<usize, Self::Error> {
        let matching = self.store.contains_key_prefix(prefix);
        for key in &matching {
            self.store.remove(key);
        }
        Ok(matching.len())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<Result<i64, IncrementError>, Self::Error> {
        let now = self.store.now_millis();
        let _ = now;
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(e) => match parse_integer(&e.value) {
                Some(current) => {
                    let next = current + delta;
                    e.value = next.to_string().into_bytes();
                    Ok(next)
                }
                None => Err(IncrementError),
            },
            None => {
                self.store.insert(key, delta.to_string().into_bytes(), None);
                Ok(delta)
            }
        }))
    }
}

/// Database-backed adapter promotion for caches with plain CRUD (no CAS
/// primitive): `add` is a conditional-insert, `increment` is read-modify-write.
#[async_trait]
pub trait DatabaseCacheAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn find(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;
    async fn insert_if_absent(&self, key: &str, value: Vec<u8>, expiration: Option<u64>) -> Result<bool, Self::Error>;
    async fn upsert(&self, key: &str, value: Vec<u8>, expiration: Option<u64>) -> Result<bool, Self::Error>;
    async fn update_if_present(&self, key: &str, value: Vec<u8>) -> Result<bool, Self::Error>;
    async fn delete(&self, key: &str) -> Result<bool, Self::Error>;
    async fn delete_all(&self) -> Result<(), Self::Error>;
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize, Self::Error>;
}

pub struct CacheProvider<A: CacheAdapter> {
    adapter: Arc<A>,
    namespace: Namespace,
    events: Arc<CacheEventBus>,
    default_ttl: Option<Duration>,
}

impl<A: CacheAdapter> Clone for CacheProvider<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            namespace: self.namespace.clone(),
            events: self.events.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<A: CacheAdapter> CacheProvider<A> {
    pub fn new(adapter: A, namespace: Namespace) -> Self {
        Self { adapter: Arc::new(adapter), namespace, events: Arc::new(EventBus::new()), default_ttl: None }
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn events(&self) -> &Arc<CacheEventBus> {
        &self.events
    }

    fn prefixed_key(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Result<Key, NamespaceError> {
        self.namespace.key(segments)
    }

    pub async fn get(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Result<Option<Vec<u8>>, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let value = self.adapter.get(&key.prefixed()).await.map_err(CacheError::Adapter)?;
        let name = if value.is_some() { CACHE_HIT } else { CACHE_MISS };
        tracing::debug!(key = %key.prefixed(), hit = value.is_some(), "cache get");
        let _ = self.events.dispatch(name, CacheEventPayload { key: key.prefixed() });
        Ok(value)
    }

    pub async fn get_or(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        default: Vec<u8>,
    ) -> Result<Vec<u8>, CacheError<A::Error>> {
        Ok(self.get(segments).await?.unwrap_or(default))
    }

    pub async fn get_or_fail(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Result<Vec<u8>, CacheError<A::Error>> {
        self.get(segments).await?.ok_or(CacheError::NotFound)
    }

    pub async fn get_and_remove(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Option<Vec<u8>>, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let value = self.adapter.get_and_remove(&key.prefixed()).await.map_err(CacheError::Adapter)?;
        if value.is_some() {
            let _ = self.events.dispatch(CACHE_REMOVED, CacheEventPayload { key: key.prefixed() });
        }
        Ok(value)
    }

    pub async fn get_or_add(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<Vec<u8>, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        if let Some(existing) = self.adapter.get(&key.prefixed()).await.map_err(CacheError::Adapter)? {
            return Ok(existing);
        }
        self.adapter
            .add(&key.prefixed(), value.clone(), ttl.or(self.default_ttl))
            .await
            .map_err(CacheError::Adapter)?;
        let _ = self.events.dispatch(CACHE_WRITTEN, CacheEventPayload { key: key.prefixed() });
        Ok(value)
    }

    pub async fn add(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let added = self
            .adapter
            .add(&key.prefixed(), value, ttl.or(self.default_ttl))
            .await
            .map_err(CacheError::Adapter)?;
        if added {
            tracing::debug!(key = %key.prefixed(), "cache entry added");
            let _ = self.events.dispatch(CACHE_WRITTEN, CacheEventPayload { key: key.prefixed() });
        }
        Ok(added)
    }

    pub async fn put(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let replaced = self
            .adapter
            .put(&key.prefixed(), value, ttl.or(self.default_ttl))
            .await
            .map_err(CacheError::Adapter)?;
        let name = if replaced { CACHE_UPDATED } else { CACHE_WRITTEN };
        tracing::debug!(key = %key.prefixed(), replaced, "cache put");
        let _ = self.events.dispatch(name, CacheEventPayload { key: key.prefixed() });
        Ok(replaced)
    }

    pub async fn update(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        value: Vec<u8>,
    ) -> Result<bool, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let updated = self.adapter.update(&key.prefixed(), value).await.map_err(CacheError::Adapter)?;
        if updated {
            let _ = self.events.dispatch(CACHE_UPDATED, CacheEventPayload { key: key.prefixed() });
        }
        Ok(updated)
    }

    pub async fn remove(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Result<bool, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        let removed = self.adapter.remove(&key.prefixed()).await.map_err(CacheError::Adapter)?;
        if removed {
            tracing::debug!(key = %key.prefixed(), "cache entry removed");
            let _ = self.events.dispatch(CACHE_REMOVED, CacheEventPayload { key: key.prefixed() });
        }
        Ok(removed)
    }

    pub async fn remove_many(&self, keys: Vec<Key>) -> Result<bool, CacheError<A::Error>> {
        let prefixed: Vec<String> = keys.iter().map(|k| k.prefixed()).collect();
        let removed = self.adapter.remove_many(&prefixed).await.map_err(CacheError::Adapter)?;
        if removed {
            let _ = self.events.dispatch(CACHE_REMOVED, CacheEventPayload { key: prefixed.join(",") });
        }
        Ok(removed)
    }

    pub async fn remove_all(&self) -> Result<(), CacheError<A::Error>> {
        self.adapter.remove_all().await.map_err(CacheError::Adapter)?;
        tracing::warn!(namespace = %self.namespace.prefixed(), "cache cleared");
        let _ = self.events.dispatch(CACHE_CLEARED, CacheEventPayload { key: self.namespace.prefixed() });
        Ok(())
    }

    pub async fn remove_by_key_prefix(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<usize, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        self.adapter.remove_by_key_prefix(&key.prefixed()).await.map_err(CacheError::Adapter)
    }

    pub async fn increment(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        delta: i64,
    ) -> Result<Result<i64, IncrementError>, CacheError<A::Error>> {
        let key = self.prefixed_key(segments)?;
        self.adapter.increment(&key.prefixed(), delta).await.map_err(CacheError::Adapter)
    }

    pub async fn decrement(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        delta: i64,
    ) -> Result<Result<i64, IncrementError>, CacheError<A::Error>> {
        self.increment(segments, -delta).await
    }
}

#[derive(Debug)]
pub enum CacheError<E> {
    NotFound,
    Namespace(NamespaceError),
    Adapter(E),
}

impl<E> From<NamespaceError> for CacheError<E> {
    fn from(e: NamespaceError) -> Self {
        Self::Namespace(e)
    }
}

impl<E: fmt::Display> fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "cache entry not found"),
            Self::Namespace(e) => write!(f, "{}", e),
            Self::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CacheError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            Self::Namespace(e) => Some(e),
            Self::NotFound => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CacheProvider<InMemoryCacheAdapter> {
        CacheProvider::new(InMemoryCacheAdapter::new(), Namespace::new("test").unwrap().with_group("cache").unwrap())
    }

    #[tokio::test]
    async fn add_succeeds_only_when_absent() {
        let p = provider();
        assert!(p.add(["k"], b"v1".to_vec(), None).await.unwrap());
        assert!(!p.add(["k"], b"v2".to_vec(), None).await.unwrap());
        assert_eq!(p.get(["k"]).await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn put_replaces_existing_value() {
        let p = provider();
        assert!(!p.put(["k"], b"v1".to_vec(), None).await.unwrap());
        assert!(p.put(["k"], b"v2".to_vec(), None).await.unwrap());
        assert_eq!(p.get(["k"]).await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn update_requires_existing_key() {
        let p = provider();
        assert!(!p.update(["k"], b"v".to_vec()).await.unwrap());
        p.add(["k"], b"v1".to_vec(), None).await.unwrap();
        assert!(p.update(["k"], b"v2".to_vec()).await.unwrap());
    }

    #[tokio::test]
    async fn increment_creates_counter_and_accumulates() {
        let p = provider();
        assert_eq!(p.increment(["c"], 5).await.unwrap(), Ok(5));
        assert_eq!(p.increment(["c"], 3).await.unwrap(), Ok(8));
        assert_eq!(p.decrement(["c"], 2).await.unwrap(), Ok(6));
    }

    #[tokio::test]
    async fn increment_on_non_integer_value_fails_typed() {
        let p = provider();
        p.add(["c"], b"not-a-number".to_vec(), None).await.unwrap();
        assert_eq!(p.increment(["c"], 1).await.unwrap(), Err(IncrementError));
    }

    #[tokio::test]
    async fn remove_by_key_prefix_removes_matching_entries() {
        let p = provider();
        p.add(["orders", "1"], b"a".to_vec(), None).await.unwrap();
        p.add(["orders", "2"], b"b".to_vec(), None).await.unwrap();
        p.add(["users", "1"], b"c".to_vec(), None).await.unwrap();
        let removed = p.remove_by_key_prefix(["orders"]).await.unwrap();
        assert!(removed >= 1);
    }

    #[tokio::test]
    async fn get_or_fail_returns_not_found_error() {
        let p = provider();
        let err = p.get_or_fail(["missing"]).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound));
    }

    #[tokio::test]
    async fn remove_all_clears_namespace() {
        let p = provider();
        p.add(["a"], b"1".to_vec(), None).await.unwrap();
        p.add(["b"], b"2".to_vec(), None).await.unwrap();
        p.remove_all().await.unwrap();
        assert_eq!(p.get(["a"]).await.unwrap(), None);
        assert_eq!(p.get(["b"]).await.unwrap(), None);
    }
}
