//! Distributed semaphore: mirrors [`crate::coordination::lock`]'s shape but
//! tracks a set of slots (up to `limit`) per key instead of a single owner.

use super::memory::{spawn_sweeper, TtlMap};
use crate::clock::{Clock, MonotonicClock};
use crate::event_bus::EventBus;
use crate::namespace::{Key, Namespace};
use crate::task::Signal;
use crate::telemetry::{PolicyEvent, PolicyEventListener, SemaphoreEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const SEM_ACQUIRED: &str = "SEM_ACQUIRED";
pub const SEM_LIMIT_REACHED: &str = "SEM_LIMIT_REACHED";
pub const SEM_RELEASED: &str = "SEM_RELEASED";
pub const SEM_FAILED_RELEASE: &str = "SEM_FAILED_RELEASE";
pub const SEM_REFRESHED: &str = "SEM_REFRESHED";
pub const SEM_FAILED_REFRESH: &str = "SEM_FAILED_REFRESH";

#[derive(Debug, Clone)]
pub struct SemaphoreEventPayload {
    pub key: String,
    pub slot_id: String,
}

pub type SemaphoreEventBus = EventBus<SemaphoreEventPayload>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreState {
    pub limit: usize,
    pub acquired_slots: HashMap<String, Option<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreReleaseResult {
    Released,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreRefreshResult {
    Refreshed,
    NotFound,
}

#[async_trait]
pub trait SemaphoreAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn acquire(&self, key: &str, slot_id: &str, limit: usize, ttl: Option<Duration>) -> Result<bool, Self::Error>;
    async fn release(&self, key: &str, slot_id: &str) -> Result<bool, Self::Error>;
    async fn force_release_all(&self, key: &str) -> Result<bool, Self::Error>;
    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool, Self::Error>;
    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>, Self::Error>;
}

type SlotMap = HashMap<String, Option<u64>>;

/// A key's configured capacity alongside its currently-held slots. `limit` is
/// pinned to whatever the first `acquire` for this key observed, so
/// `get_state` can report true capacity rather than the transient held count.
#[derive(Debug, Clone, Default)]
struct Slots {
    limit: usize,
    held: SlotMap,
}

/// In-memory [`SemaphoreAdapter`], TTL-swept in the background.
pub struct InMemorySemaphoreAdapter {
    store: Arc<TtlMap<Slots>>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl InMemorySemaphoreAdapter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(TtlMap::new(clock));
        let sweeper = spawn_sweeper(store.clone(), Duration::from_secs(60));
        Self { store, _sweeper: sweeper }
    }

    fn unexpired_count(&self, slots: &SlotMap, now: u64) -> usize {
        slots.values().filter(|exp| !matches!(exp, Some(e) if *e <= now)).count()
    }
}

impl Default for InMemorySemaphoreAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemorySemaphoreAdapter {
    fn drop(&mut self) {
        self._sweeper.abort();
    }
}

#[async_trait]
impl SemaphoreAdapter for InMemorySemaphoreAdapter {
    type Error = Infallible;

    async fn acquire(&self, key: &str, slot_id: &str, limit: usize, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = self.store.ttl_to_expiration(ttl);
        let now = self.store.now_millis();
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(e) => {
                e.value.limit = limit;
                if self.unexpired_count(&e.value.held, now) < limit {
                    e.value.held.insert(slot_id.to_string(), expiration);
                    true
                } else {
                    false
                }
            }
            None => {
                let mut slots = Slots { limit, held: SlotMap::new() };
                if limit > 0 {
                    slots.held.insert(slot_id.to_string(), expiration);
                }
                self.store.insert(key, slots, None);
                limit > 0
            }
        }))
    }

    async fn release(&self, key: &str, slot_id: &str) -> Result<bool, Self::Error> {
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(e) => e.value.held.remove(slot_id).is_some(),
            None => false,
        }))
    }

    async fn force_release_all(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.store.remove(key).is_some())
    }

    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool, Self::Error> {
        let new_expiration = self.store.ttl_to_expiration(Some(ttl));
        let now = self.store.now_millis();
        Ok(self.store.with_entry(key, |entry| match entry {
            Some(e) => match e.value.held.get(slot_id) {
                Some(exp) if !matches!(exp, Some(e) if *e <= now) => {
                    e.value.held.insert(slot_id.to_string(), new_expiration);
                    true
                }
                _ => false,
            },
            None => false,
        }))
    }

    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>, Self::Error> {
        Ok(self.store.with_entry(key, |entry| {
            entry.map(|e| SemaphoreState { limit: e.value.limit, acquired_slots: e.value.held.clone() })
        }))
    }
}

#[async_trait]
pub trait DatabaseSemaphoreAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Atomic "count-then-insert under limit" in one conditional step.
    async fn conditional_insert(&self, key: &str, slot_id: &str, limit: usize, expiration: Option<u64>) -> Result<bool, Self::Error>;
    async fn remove(&self, key: &str, slot_id: &str) -> Result<bool, Self::Error>;
    async fn remove_all(&self, key: &str) -> Result<bool, Self::Error>;
    async fn refresh(&self, key: &str, slot_id: &str, expiration: Option<u64>) -> Result<bool, Self::Error>;
    async fn find(&self, key: &str) -> Result<Option<SemaphoreState>, Self::Error>;
}

pub struct DatabaseSemaphoreAdapterPromotion<D> {
    db: D,
    clock: Arc<dyn Clock>,
}

impl<D> DatabaseSemaphoreAdapterPromotion<D> {
    pub fn new(db: D, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl<D: DatabaseSemaphoreAdapter> SemaphoreAdapter for DatabaseSemaphoreAdapterPromotion<D> {
    type Error = D::Error;

    async fn acquire(&self, key: &str, slot_id: &str, limit: usize, ttl: Option<Duration>) -> Result<bool, Self::Error> {
        let expiration = ttl.map(|d| self.clock.now_millis() + d.as_millis() as u64);
        self.db.conditional_insert(key, slot_id, limit, expiration).await
    }

    async fn release(&self, key: &str, slot_id: &str) -> Result<bool, Self::Error> {
        self.db.remove(key, slot_id).await
    }

    async fn force_release_all(&self, key: &str) -> Result<bool, Self::Error> {
        self.db.remove_all(key).await
    }

    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool, Self::Error> {
        let expiration = Some(self.clock.now_millis() + ttl.as_millis() as u64);
        self.db.refresh(key, slot_id, expiration).await
    }

    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>, Self::Error> {
        self.db.find(key).await
    }
}

#[derive(Debug)]
pub enum SemaphoreError<E> {
    LimitReached,
    Adapter(E),
}

impl<E: fmt::Display> fmt::Display for SemaphoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitReached => write!(f, "semaphore limit reached"),
            Self::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for SemaphoreError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            Self::LimitReached => None,
        }
    }
}

pub struct SemaphoreProvider<A: SemaphoreAdapter> {
    adapter: Arc<A>,
    namespace: Namespace,
    events: Arc<SemaphoreEventBus>,
    default_limit: usize,
    default_ttl: Option<Duration>,
    telemetry: Option<PolicyEventListener>,
}

impl<A: SemaphoreAdapter> Clone for SemaphoreProvider<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            namespace: self.namespace.clone(),
            events: self.events.clone(),
            default_limit: self.default_limit,
            default_ttl: self.default_ttl,
            telemetry: self.telemetry.clone(),
        }
    }
}

impl<A: SemaphoreAdapter> SemaphoreProvider<A> {
    pub fn new(adapter: A, namespace: Namespace, default_limit: usize) -> Self {
        Self {
            adapter: Arc::new(adapter),
            namespace,
            events: Arc::new(EventBus::new()),
            default_limit,
            default_ttl: Some(Duration::from_secs(30)),
            telemetry: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Feed every acquire/reject this provider's handles make into `listener`
    /// as a [`crate::telemetry::PolicyEvent`], in addition to the named
    /// [`SemaphoreEventBus`] dispatch and `tracing` calls.
    pub fn with_telemetry(mut self, listener: PolicyEventListener) -> Self {
        self.telemetry = Some(listener);
        self
    }

    pub fn events(&self) -> &Arc<SemaphoreEventBus> {
        &self.events
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn create(
        &self,
        segments: impl IntoIterator<Item = impl Into<String>>,
        limit: Option<usize>,
        ttl: Option<Duration>,
    ) -> Result<SemaphoreHandle<A>, crate::namespace::NamespaceError> {
        let key = self.namespace.key(segments)?;
        Ok(SemaphoreHandle {
            provider: self.clone(),
            key,
            slot_id: Uuid::new_v4().to_string(),
            limit: limit.unwrap_or(self.default_limit),
            ttl: ttl.or(self.default_ttl),
        })
    }
}

pub struct SemaphoreHandle<A: SemaphoreAdapter> {
    provider: SemaphoreProvider<A>,
    key: Key,
    slot_id: String,
    limit: usize,
    ttl: Option<Duration>,
}

impl<A: SemaphoreAdapter> SemaphoreHandle<A> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Rebuild this handle with a caller-supplied `slot_id`, e.g. when
    /// reviving a handle a remote process serialized earlier.
    pub fn with_slot_id(mut self, slot_id: impl Into<String>) -> Self {
        self.slot_id = slot_id.into();
        self
    }

    fn prefixed(&self) -> String {
        self.key.prefixed()
    }

    fn payload(&self) -> SemaphoreEventPayload {
        SemaphoreEventPayload { key: self.prefixed(), slot_id: self.slot_id.clone() }
    }

    pub async fn acquire(&self) -> Result<bool, A::Error> {
        let acquired = self.provider.adapter.acquire(&self.prefixed(), &self.slot_id, self.limit, self.ttl).await?;
        let name = if acquired { SEM_ACQUIRED } else { SEM_LIMIT_REACHED };
        if acquired {
            tracing::debug!(key = %self.prefixed(), slot_id = %self.slot_id, "semaphore slot acquired");
        } else {
            tracing::warn!(key = %self.prefixed(), limit = self.limit, "semaphore limit reached");
        }
        let _ = self.provider.events.dispatch(name, self.payload());
        if let Some(listener) = &self.provider.telemetry {
            let active_count = self.provider.adapter.get_state(&self.prefixed()).await?.map(|s| s.acquired_slots.len()).unwrap_or(0);
            let event = if acquired {
                SemaphoreEvent::Acquired { active_count, max_concurrency: self.limit }
            } else {
                SemaphoreEvent::Rejected { active_count, max_concurrency: self.limit }
            };
            listener(PolicyEvent::Semaphore(event));
        }
        Ok(acquired)
    }

    pub async fn acquire_or_fail(&self) -> Result<(), SemaphoreError<A::Error>> {
        match self.acquire().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SemaphoreError::LimitReached),
            Err(e) => Err(SemaphoreError::Adapter(e)),
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

    pub async fn release(&self) -> Result<SemaphoreReleaseResult, A::Error> {
        let released = self.provider.adapter.release(&self.prefixed(), &self.slot_id).await?;
        let result = if released { SemaphoreReleaseResult::Released } else { SemaphoreReleaseResult::NotFound };
        let name = if released { SEM_RELEASED } else { SEM_FAILED_RELEASE };
        if released {
            tracing::debug!(key = %self.prefixed(), "semaphore slot released");
        } else {
            tracing::debug!(key = %self.prefixed(), "semaphore release found nothing to release");
        }
        let _ = self.provider.events.dispatch(name, self.payload());
        Ok(result)
    }

    pub async fn force_release_all(&self) -> Result<bool, A::Error> {
        let removed = self.provider.adapter.force_release_all(&self.prefixed()).await?;
        if removed {
            tracing::warn!(key = %self.prefixed(), "semaphore force-released all slots");
        }
        Ok(removed)
    }

    pub async fn refresh(&self, ttl: Option<Duration>) -> Result<SemaphoreRefreshResult, A::Error> {
        let ttl = ttl.or(self.ttl).unwrap_or(Duration::from_secs(10));
        let refreshed = self.provider.adapter.refresh(&self.prefixed(), &self.slot_id, ttl).await?;
        let result = if refreshed { SemaphoreRefreshResult::Refreshed } else { SemaphoreRefreshResult::NotFound };
        let name = if refreshed { SEM_REFRESHED } else { SEM_FAILED_REFRESH };
        if refreshed {
            tracing::debug!(key = %self.prefixed(), "semaphore slot refreshed");
        } else {
            tracing::warn!(key = %self.prefixed(), slot_id = %self.slot_id, "semaphore refresh found no matching unexpired slot");
        }
        let _ = self.provider.events.dispatch(name, self.payload());
        Ok(result)
    }

    pub async fn get_state(&self) -> Result<Option<SemaphoreState>, A::Error> {
        self.provider.adapter.get_state(&self.prefixed()).await
    }

    pub async fn run<T, Err, F, Fut>(&self, f: F) -> Result<T, RunSemaphoreError<A::Error, Err>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Err>>,
    {
        self.acquire_or_fail().await.map_err(|e| match e {
            SemaphoreError::LimitReached => RunSemaphoreError::LimitReached,
            SemaphoreError::Adapter(e) => RunSemaphoreError::Adapter(e),
        })?;
        let result = f().await;
        let _ = self.release().await;
        result.map_err(RunSemaphoreError::Inner)
    }

    pub async fn run_blocking<T, Err, F, Fut>(
        &self,
        blocking_time: Duration,
        interval: Duration,
        signal: Option<&Signal>,
        f: F,
    ) -> Result<T, RunSemaphoreError<A::Error, Err>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Err>>,
    {
        let acquired = self.acquire_blocking(blocking_time, interval, signal).await.map_err(RunSemaphoreError::Adapter)?;
        if !acquired {
            return Err(RunSemaphoreError::LimitReached);
        }
        let result = f().await;
        let _ = self.release().await;
        result.map_err(RunSemaphoreError::Inner)
    }
}

#[derive(Debug)]
pub enum RunSemaphoreError<AErr, Err> {
    LimitReached,
    Adapter(AErr),
    Inner(Err),
}

impl<AErr: fmt::Display, Err: fmt::Display> fmt::Display for RunSemaphoreError<AErr, Err> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitReached => write!(f, "semaphore limit reached"),
            Self::Adapter(e) => write!(f, "{}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<AErr: std::error::Error + 'static, Err: std::error::Error + 'static> std::error::Error for RunSemaphoreError<AErr, Err> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(e) => Some(e),
            Self::Inner(e) => Some(e),
            Self::LimitReached => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(limit: usize) -> SemaphoreProvider<InMemorySemaphoreAdapter> {
        SemaphoreProvider::new(InMemorySemaphoreAdapter::new(), Namespace::new("test").unwrap().with_group("sem").unwrap(), limit)
    }

    #[tokio::test]
    async fn acquire_succeeds_under_limit() {
        let p = provider(2);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        assert!(a.acquire().await.unwrap());
        assert!(b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn acquire_fails_once_limit_reached() {
        let p = provider(1);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_a_slot_for_others() {
        let p = provider(1);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        a.acquire().await.unwrap();
        assert_eq!(a.release().await.unwrap(), SemaphoreReleaseResult::Released);
        assert!(b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn get_state_reports_configured_limit_not_held_count() {
        let p = provider(3);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        a.acquire().await.unwrap();
        b.acquire().await.unwrap();

        let state = a.get_state().await.unwrap().unwrap();
        assert_eq!(state.limit, 3);
        assert_eq!(state.acquired_slots.len(), 2);
    }

    #[tokio::test]
    async fn telemetry_listener_observes_acquire_and_rejection() {
        use crate::telemetry::sinks::MemorySink;
        use crate::telemetry::{sink_listener, PolicyEvent, SemaphoreEvent};

        let sink = MemorySink::new();
        let p = SemaphoreProvider::new(InMemorySemaphoreAdapter::new(), Namespace::new("test").unwrap().with_group("sem-telemetry").unwrap(), 1)
            .with_telemetry(sink_listener(sink.clone()));
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let events = sink.events();
        assert!(events.iter().any(|e| matches!(e, PolicyEvent::Semaphore(SemaphoreEvent::Acquired { .. }))));
        assert!(events.iter().any(|e| matches!(e, PolicyEvent::Semaphore(SemaphoreEvent::Rejected { .. }))));
    }

    #[tokio::test]
    async fn force_release_all_drops_every_slot() {
        let p = provider(2);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        a.acquire().await.unwrap();
        b.acquire().await.unwrap();
        assert!(a.force_release_all().await.unwrap());
        assert!(a.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_requires_existing_unexpired_slot() {
        let p = provider(1);
        let a = p.create(["pool"], None, Some(Duration::from_secs(1))).unwrap();
        a.acquire().await.unwrap();
        assert_eq!(a.refresh(None).await.unwrap(), SemaphoreRefreshResult::Refreshed);
    }

    #[tokio::test]
    async fn run_releases_slot_after_completion() {
        let p = provider(1);
        let a = p.create(["pool"], None, None).unwrap();
        a.run(|| async { Ok::<_, Infallible>(42) }).await.unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        assert!(b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn acquire_blocking_succeeds_once_a_slot_frees_up() {
        let p = provider(1);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
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
    async fn acquire_blocking_is_cancellable_via_signal() {
        use crate::task::CancelReason;

        let p = provider(1);
        let a = p.create(["pool"], None, None).unwrap();
        let b = p.create(["pool"], None, None).unwrap();
        a.acquire().await.unwrap();

        let signal = Signal::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.abort(CancelReason::new(std::io::Error::new(std::io::ErrorKind::Other, "cancelled")));
        });

        let acquired = b.acquire_blocking(Duration::from_secs(5), Duration::from_millis(5), Some(&signal)).await.unwrap();
        assert!(!acquired);
    }
}
