//! Distributed lock: adapter contract, in-memory adapter, database-adapter
//! promotion, and the provider/handle pair applications actually call.

use super::memory::{spawn_sweeper, TtlMap};
use crate::clock::{Clock, MonotonicClock};
use crate::event_bus::EventBus;
use crate::namespace::{Key, Namespace};
use crate::task::Signal;
use async_trait::async_trait;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const LOCK_ACQUIRED: &str = "LOCK_ACQUIRED";
pub const LOCK_UNAVAILABLE: &str = "LOCK_UNAVAILABLE";
pub const LOCK_RELEASED: &str = "LOCK_RELEASED";
pub const LOCK_NOT_FOUND_RELEASE: &str = "LOCK_NOT_FOUND_RELEASE";
pub const LOCK_UNOWNED_RELEASE: &str = "LOCK_UNOWNED_RELEASE";
pub const LOCK_FORCE_RELEASED: &str = "LOCK_FORCE_RELEASED";
pub const LOCK_REFRESHED: &str = "LOCK_REFRESHED";
pub const LOCK_UNOWNED_REFRESH: &str = "LOCK_UNOWNED_REFRESH";
pub const LOCK_UNEXPIREABLE_REFRESH: &str = "LOCK_UNEXPIREABLE_REFRESH";

#[derive(Debug, Clone)]
pub struct LockEventPayload {
    pub key: String,
    pub lock_id: String,
}

pub type LockEventBus = EventBus<LockEventPayload>;

/// Snapshot of a lock record as currently held in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    pub owner: String,
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReleaseResult {
    Released,
    NotFound,
    UnownedRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRefreshResult {
    Refreshed,
    UnownedRefresh,
    UnexpirableKey,
}

/// Process-boundary contract a storage backend must satisfy to back a [`LockProvider`].
#[async_trait]
pub trait LockAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn acquire(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool, Self::Error>;
    async fn release(&self, key: &str, owner: &str) -> Result<bool, Self::Error>;
    async fn force_release(&self, key: &str) -> Result<bool, Self::Error>;
    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockRefreshResult, Self::Error>;
    async fn get_state(&self, key: &str) -> Result<Option<LockState>, Self::Error>;
}

/// In-memory [`LockAdapter`], TTL-swept in the background.
pub struct InMemoryLockAdapter {
    store: Arc<TtlMap<String>>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl InMemoryLockAdapter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(TtlMap::new(clock));
        let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(60));
        Self { store, _sweeper: sweeper }
    }
}

impl Default for InMemoryLockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryLockAdapter {
    fn drop(&mut self) {
        self._sweeper.abort();
    }
}

#[async_trait]
impl LockAdapter for InMemoryLockAdapter {
    type Error = Infallible;

    async fn acquire(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = self.store.ttl_to_expiration(ttl);
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(_) => false,
            None => {
                self.store.insert(key, owner.to_string(), expiration);
                true
            }
        }))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, Self::Error> {
        let removed = self.store.with_entry(key, |entry| match entry {
            Some(e) if e.value == owner => true,
            _ => false,
        });
        if removed {
            self.store.remove(key);
        }
        Ok(removed)
    }

    async fn force_release(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.store.remove(key).is_some())
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockRefreshResult, Self::Error> {
        let new_expiration = self.store.ttl_to_expiration(Some(ttl));
        Ok(self.store.with_entry(key, |entry| match entry {
            None => LockRefreshResult::UnownedRefresh,
            Some(e) if e.value != owner => LockRefreshResult::UnownedRefresh,
            Some(e) => {
                e.expires_at_millis = new_expiration;
                LockRefreshResult::Refreshed
            }
        }))
    }

    async fn get_state(&self, key: &str) -> Result<Option<LockState>, Self::Error> {
        Ok(self.store.with_entry(key, |entry| {
            entry.map(|e| LockState { owner: e.value.clone(), expiration: e.expires_at_millis })
        }))
    }
}

/// Narrow CRUD contract (§4.5.2) the core promotes to the full [`LockAdapter`]
/// surface for stores that only offer insert/update/remove, not a single
/// atomic acquire primitive.
#[async_trait]
pub trait DatabaseLockAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// `Ok(false)` signals a unique-key violation (record already present).
    async fn insert(&self, key: &str, owner: &str, expiration: Option<u64>) -> Result<bool, Self::Error>;
    /// Compare-and-set: only applies when the existing record is expired.
    async fn update(&self, key: &str, owner: &str, expiration: Option<u64>) -> Result<bool, Self::Error>;
    async fn remove(&self, key: &str, owner: &str) -> Result<bool, Self::Error>;
    async fn remove_unowned(&self, key: &str) -> Result<bool, Self::Error>;
    async fn refresh(&self, key: &str, owner: &str, expiration: Option<u64>) -> Result<LockRefreshResult, Self::Error>;
    async fn find(&self, key: &str) -> Result<Option<LockState>, Self::Error>;
}

/// Promotes a [`DatabaseLockAdapter`] (plain CRUD) into a full [`LockAdapter`]
/// using the collapse-without-transactions algorithm from §4.5.2: insert,
/// and only on a unique-key violation re-check whether the existing record
/// is expired before stealing it with a compare-and-set update.
pub struct DatabaseLockAdapterPromotion<D> {
    db: D,
    clock: Arc<dyn Clock>,
}

impl<D> DatabaseLockAdapterPromotion<D> {
    pub fn new(db: D, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl<D: DatabaseLockAdapter> LockAdapter for DatabaseLockAdapterPromotion<D> {
    type Error = D::Error;

    async fn acquire(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = ttl.map(|d| self.clock.now_millis() + d.as_millis() as u64);
        if self.db.insert(key, owner, expiration).await? {
            return Ok(true);
        }
        match self.db.find(key).await? {
            Some(state) => {
                let now = self.clock.now_millis();
                let expired = matches!(state.expiration, Some(exp) if exp <= now);
                if !expired {
                    Ok(false)
                } else {
                    self.db.update(key, owner, expiration).await
                }
            }
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, Self::Error> {
        self.db.remove(key, owner).await
    }

    async fn force_release(&self, key: &str) -> Result<bool, Self::Error> {
        self.db.remove_unowned(key).await
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<LockRefreshResult, Self::Error> {
        let expiration = Some(self.clock.now_millis() + ttl.as_millis() as u64);
        self.db.refresh(key, owner, expiration).await
    }

    async fn get_state(&self, key: &str) -> Result<Option<LockState>, Self::Error> {
        self.db.find(key).await
    }
}

#[derive(Debug)]
pub enum LockError<E> {
    AlreadyAcquired,
    Adapter(E),
}

impl<E: fmt::Display> fmt::Display for LockError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAcquired => write!(f, "lock already acquired by another owner"),
            Self::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LockError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            Self::AlreadyAcquired => None,
        }
    }
}

#[derive(Debug)]
pub enum RefreshLockError<E> {
    UnownedRefresh,
    UnexpirableKey,
    Adapter(E),
}

impl<E: fmt::Display> fmt::Display for RefreshLockError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnownedRefresh => write!(f, "refresh attempted by non-owner"),
            Self::UnexpirableKey => write!(f, "key has no expiration to refresh"),
            Self::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RefreshLockError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            _ => None,
        }
    }
}

/// Owns the adapter and configuration shared by every handle it mints.
/// Effectively immutable: builder methods return a new provider.
pub struct LockProvider<A: LockAdapter> {
    adapter: Arc<A>,
    namespace: Namespace,
    events: Arc<LockEventBus>,
    clock: Arc<dyn Clock>,
    default_ttl: Option<Duration>,
    default_blocking_interval: Duration,
    default_blocking_time: Duration,
    default_refresh_time: Duration,
}

impl<A: LockAdapter> Clone for LockProvider<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            namespace: self.namespace.clone(),
            events: self.events.clone(),
            clock: self.clock.clone(),
            default_ttl: self.default_ttl,
            default_blocking_interval: self.default_blocking_interval,
            default_blocking_time: self.default_blocking_time,
            default_refresh_time: self.default_refresh_time,
        }
    }
}

impl<A: LockAdapter> LockProvider<A> {
    pub fn new(adapter: A, namespace: Namespace) -> Self {
        Self {
            adapter: Arc::new(adapter),
            namespace,
            events: Arc::new(EventBus::new()),
            clock: Arc::new(MonotonicClock::default()),
            default_ttl: Some(Duration::from_secs(30)),
            default_blocking_interval: Duration::from_millis(100),
            default_blocking_time: Duration::from_secs(10),
            default_refresh_time: Duration::from_secs(10),
        }
    }

    /// Clock used for this handle's local `is_expired`/`get_remaining_time`
    /// diagnostics. Set this to the same clock passed to the adapter (e.g.
    /// a shared `ManualClock` in tests) so diagnostics agree with the store.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_default_blocking_interval(mut self, interval: Duration) -> Self {
        self.default_blocking_interval = interval;
        self
    }

    pub fn with_default_blocking_time(mut self, time: Duration) -> Self {
        self.default_blocking_time = time;
        self
    }

    pub fn events(&self) -> &Arc<LockEventBus> {
        &self.events
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Mint a handle for `key`. The handle carries its own generated
    /// `lockId` and the effective TTL (falling back to the provider default).
    pub fn create(&self, segments: impl IntoIterator<Item = impl Into<String>>, ttl: Option<Duration>) -> Result<LockHandle<A>, crate::namespace::NamespaceError> {
        let key = self.namespace.key(segments)?;
        Ok(LockHandle {
            provider: self.clone(),
            key,
            lock_id: Uuid::new_v4().to_string(),
            ttl: ttl.or(self.default_ttl),
        })
    }
}

/// A serializable descriptor pointing at one lock resource. Carries no
/// persistent state itself — the adapter is authoritative.
pub struct LockHandle<A: LockAdapter> {
    provider: LockProvider<A>,
    key: Key,
    lock_id: String,
    ttl: Option<Duration>,
}

impl<A: LockAdapter> LockHandle<A> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Rebuild this handle with a caller-supplied `lock_id`, e.g. when
    /// reviving a handle a remote process serialized earlier.
    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = lock_id.into();
        self
    }

    fn prefixed(&self) -> String {
        self.key.prefixed()
    }

    fn payload(&self) -> LockEventPayload {
        LockEventPayload { key: self.prefixed(), lock_id: self.lock_id.clone() }
    }

    pub async fn acquire(&self) -> Result<bool, A::Error> {
        let acquired = self.provider.adapter.acquire(&self.prefixed(), &self.lock_id, self.ttl).await?;
        let name = if acquired { LOCK_ACQUIRED } else { LOCK_UNAVAILABLE };
        if acquired {
            tracing::debug!(key = %self.prefixed(), lock_id = %self.lock_id, "lock acquired");
        } else {
            tracing::warn!(key = %self.prefixed(), "lock contended, already held");
        }
        let _ = self.provider.events.dispatch(name, self.payload());
        Ok(acquired)
    }

    pub async fn acquire_or_fail(&self) -> Result<(), LockError<A::Error>> {
        match self.acquire().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LockError::AlreadyAcquired),
            Err(e) => Err(LockError::Adapter(e)),
        }
    }

    /// Polls `acquire` on `interval` up to `blocking_time`; returns `false`
    /// on deadline. Cancellable via `signal`.
    pub async fn acquire_blocking(&self, blocking_time: Duration, interval: Duration, signal: Option<&Signal>) -> Result<bool, A::Error> {
        let deadline = tokio::time::Instant::now() + blocking_time;
        loop {
            if self.acquire().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            let sleep = tokio::time::sleep(interval.min(deadline.saturating_duration_since(tokio::time::Instant::now())));
            match signal {
                Some(sig) => {
                    tokio::select! {
                        _ = sleep => {}
                        _ = sig.cancelled() => return Ok(false),
                    }
                }
                None => sleep.await,
            }
        }
    }

    pub async fn release(&self) -> Result<LockReleaseResult, A::Error> {
        let state = self.provider.adapter.get_state(&self.prefixed()).await?;
        let result = match state {
            None => LockReleaseResult::NotFound,
            Some(s) if s.owner != self.lock_id => LockReleaseResult::UnownedRelease,
            Some(_) => {
                if self.provider.adapter.release(&self.prefixed(), &self.lock_id).await? {
                    LockReleaseResult::Released
                } else {
                    LockReleaseResult::NotFound
                }
            }
        };
        let name = match result {
            LockReleaseResult::Released => LOCK_RELEASED,
            LockReleaseResult::NotFound => LOCK_NOT_FOUND_RELEASE,
            LockReleaseResult::UnownedRelease => LOCK_UNOWNED_RELEASE,
        };
        match result {
            LockReleaseResult::Released => tracing::debug!(key = %self.prefixed(), "lock released"),
            LockReleaseResult::NotFound => tracing::debug!(key = %self.prefixed(), "lock release found nothing to release"),
            LockReleaseResult::UnownedRelease => {
                tracing::warn!(key = %self.prefixed(), lock_id = %self.lock_id, "lock release attempted by non-owner")
            }
        }
        let _ = self.provider.events.dispatch(name, self.payload());
        Ok(result)
    }

    pub async fn force_release(&self) -> Result<bool, A::Error> {
        let removed = self.provider.adapter.force_release(&self.prefixed()).await?;
        if removed {
            tracing::warn!(key = %self.prefixed(), "lock force-released");
            let _ = self.provider.events.dispatch(LOCK_FORCE_RELEASED, self.payload());
        }
        Ok(removed)
    }

    pub async fn refresh(&self, ttl: Option<Duration>) -> Result<(), RefreshLockError<A::Error>> {
        let ttl = ttl.or(self.ttl).unwrap_or(self.provider.default_refresh_time);
        let result = self.provider.adapter.refresh(&self.prefixed(), &self.lock_id, ttl).await.map_err(RefreshLockError::Adapter)?;
        match result {
            LockRefreshResult::Refreshed => {
                tracing::debug!(key = %self.prefixed(), "lock refreshed");
                let _ = self.provider.events.dispatch(LOCK_REFRESHED, self.payload());
                Ok(())
            }
            LockRefreshResult::UnownedRefresh => {
                tracing::warn!(key = %self.prefixed(), lock_id = %self.lock_id, "lock refresh attempted by non-owner");
                let _ = self.provider.events.dispatch(LOCK_UNOWNED_REFRESH, self.payload());
                Err(RefreshLockError::UnownedRefresh)
            }
            LockRefreshResult::UnexpirableKey => {
                tracing::debug!(key = %self.prefixed(), "lock refresh skipped, key has no TTL");
                let _ = self.provider.events.dispatch(LOCK_UNEXPIREABLE_REFRESH, self.payload());
                Err(RefreshLockError::UnexpirableKey)
            }
        }
    }

    pub async fn get_state(&self) -> Result<Option<LockState>, A::Error> {
        self.provider.adapter.get_state(&self.prefixed()).await
    }

    pub async fn is_locked(&self) -> Result<bool, A::Error> {
        Ok(self.get_state().await?.is_some())
    }

    pub async fn is_expired(&self) -> Result<bool, A::Error> {
        match self.get_state().await? {
            None => Ok(true),
            Some(s) => Ok(matches!(s.expiration, Some(exp) if exp <= self.provider_now())),
        }
    }

    fn provider_now(&self) -> u64 {
        self.provider.clock.now_millis()
    }

    pub async fn get_remaining_time(&self) -> Result<Option<Duration>, A::Error> {
        match self.get_state().await? {
            None => Ok(None),
            Some(LockState { expiration: None, .. }) => Ok(None),
            Some(LockState { expiration: Some(exp), .. }) => {
                let now = self.provider_now();
                Ok(Some(Duration::from_millis(exp.saturating_sub(now))))
            }
        }
    }

    /// Acquire, run `f`, then always release (even if `f` errors).
    pub async fn run<T, Err, F, Fut>(&self, f: F) -> Result<T, RunLockError<A::Error, Err>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Err>>,
    {
        self.acquire_or_fail().await.map_err(|e| match e {
            LockError::AlreadyAcquired => RunLockError::AlreadyAcquired,
            LockError::Adapter(e) => RunLockError::Adapter(e),
        })?;
        let result = f().await;
        let _ = self.release().await;
        result.map_err(RunLockError::Inner)
    }

    pub async fn run_blocking<T, Err, F, Fut>(
        &self,
        blocking_time: Duration,
        interval: Duration,
        signal: Option<&Signal>,
        f: F,
    ) -> Result<T, RunLockError<A::Error, Err>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Err>>,
    {
        let acquired = self.acquire_blocking(blocking_time, interval, signal).await.map_err(RunLockError::Adapter)?;
        if !acquired {
            return Err(RunLockError::AlreadyAcquired);
        }
        let result = f().await;
        let _ = self.release().await;
        result.map_err(RunLockError::Inner)
    }
}

#[derive(Debug)]
pub enum RunLockError<AErr, Err> {
    AlreadyAcquired,
    Adapter(AErr),
    Inner(Err),
}

impl<AErr: fmt::Display, Err: fmt::Display> fmt::Display for RunLockError<AErr, Err> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAcquired => write!(f, "lock already acquired by another owner"),
            Self::Adapter(e) => write!(f, "{}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<AErr: std::error::Error + 'static, Err: std::error::Error + 'static> std::error::Error for RunLockError<AErr, Err> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            Self::Inner(e) => Some(e),
            Self::AlreadyAcquired => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn provider() -> LockProvider<InMemoryLockAdapter> {
        LockProvider::new(InMemoryLockAdapter::new(), Namespace::new("test").unwrap().with_group("locks").unwrap())
    }

    #[tokio::test]
    async fn acquire_succeeds_when_key_absent() {
        let handle = provider().create(["order-1"], Some(Duration::from_secs(1))).unwrap();
        assert!(handle.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn second_acquire_by_different_owner_fails() {
        let p = provider();
        let a = p.create(["order-1"], None).unwrap();
        let b = p.create(["order-1"], None).unwrap();
        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_owner() {
        let p = provider();
        let a = p.create(["order-1"], None).unwrap();
        let b = p.create(["order-1"], None).unwrap();
        a.acquire().await.unwrap();
        assert_eq!(b.release().await.unwrap(), LockReleaseResult::UnownedRelease);
        assert_eq!(a.release().await.unwrap(), LockReleaseResult::Released);
    }

    #[tokio::test]
    async fn release_on_absent_key_is_not_found() {
        let handle = provider().create(["order-1"], None).unwrap();
        assert_eq!(handle.release().await.unwrap(), LockReleaseResult::NotFound);
    }

    #[tokio::test]
    async fn force_release_removes_regardless_of_owner() {
        let p = provider();
        let a = p.create(["order-1"], None).unwrap();
        let b = p.create(["order-1"], None).unwrap();
        a.acquire().await.unwrap();
        assert!(b.force_release().await.unwrap());
        assert!(a.acquire_or_fail().await.is_ok());
    }

    #[tokio::test]
    async fn refresh_fails_for_non_owner() {
        let p = provider();
        let a = p.create(["order-1"], Some(Duration::from_secs(1))).unwrap();
        let b = p.create(["order-1"], None).unwrap();
        a.acquire().await.unwrap();
        assert!(matches!(b.refresh(None).await, Err(RefreshLockError::UnownedRefresh)));
    }

    #[tokio::test]
    async fn acquire_blocking_succeeds_once_released() {
        let p = provider();
        let a = p.create(["order-1"], None).unwrap();
        let b = p.create(["order-1"], None).unwrap();
        a.acquire().await.unwrap();
        tokio::spawn({
            let a_release = a;
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                a_release.release().await.unwrap();
            }
        });
        let acquired = b.acquire_blocking(Duration::from_secs(1), Duration::from_millis(5), None).await.unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn run_always_releases_even_on_inner_error() {
        let p = provider();
        let handle = p.create(["order-1"], None).unwrap();
        let result: Result<(), RunLockError<Infallible, &str>> =
            handle.run(|| async { Err::<(), _>("boom") }).await;
        assert!(matches!(result, Err(RunLockError::Inner("boom"))));
        assert!(handle.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn database_promotion_acquires_and_steals_expired_key() {
        struct MapDb {
            rows: std::sync::Mutex<std::collections::HashMap<String, (String, Option<u64>)>>,
        }

        #[async_trait]
        impl DatabaseLockAdapter for MapDb {
            type Error = Infallible;

            async fn insert(&self, key: &str, owner: &str, expiration: Option<u64>) -> Result<bool, Self::Error> {
                let mut guard = self.rows.lock().unwrap();
                if guard.contains_key(key) {
                    return Ok(false);
                }
                guard.insert(key.to_string(), (owner.to_string(), expiration));
                Ok(true)
            }

            async fn update(&self, key: &str, owner: &str, expiration: Option<u64>) -> Result<bool, Self::Error> {
                let mut guard = self.rows.lock().unwrap();
                guard.insert(key.to_string(), (owner.to_string(), expiration));
                Ok(true)
            }

            async fn remove(&self, key: &str, owner: &str) -> Result<bool, Self::Error> {
                let mut guard = self.rows.lock().unwrap();
                if guard.get(key).map(|(o, _)| o == owner).unwrap_or(false) {
                    guard.remove(key);
                    return Ok(true);
                }
                Ok(false)
            }

            async fn remove_unowned(&self, key: &str) -> Result<bool, Self::Error> {
                Ok(self.rows.lock().unwrap().remove(key).is_some())
            }

            async fn refresh(&self, _key: &str, _owner: &str, _expiration: Option<u64>) -> Result<LockRefreshResult, Self::Error> {
                Ok(LockRefreshResult::Refreshed)
            }

            async fn find(&self, key: &str) -> Result<Option<LockState>, Self::Error> {
                Ok(self.rows.lock().unwrap().get(key).map(|(o, e)| LockState { owner: o.clone(), expiration: *e }))
            }
        }

        let clock = Arc::new(ManualClock::new());
        let db = MapDb { rows: std::sync::Mutex::new(std::collections::HashMap::new()) };
        let promoted = DatabaseLockAdapterPromotion::new(db, clock.clone());

        assert!(promoted.acquire("k", "owner-a", Some(Duration::from_millis(10))).await.unwrap());
        assert!(!promoted.acquire("k", "owner-b", None).await.unwrap());

        clock.set(20);
        assert!(promoted.acquire("k", "owner-b", None).await.unwrap());
    }
}
