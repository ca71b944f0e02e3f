//! Cross-process coordination primitives: distributed lock, semaphore, and
//! cache, each following the same adapter/provider/handle shape (§4.5).
//!
//! Adapters are the process boundary to storage; providers own an adapter
//! plus a namespace and event bus and construct handles; handles are
//! lightweight value-types carrying no persistent state of their own — the
//! adapter is always authoritative. The in-memory adapter shipped for each
//! primitive runs a background TTL sweeper (see [`memory`]).

pub mod cache;
pub mod lock;
pub(crate) mod memory;
pub mod semaphore;

pub use cache::{
    CacheAdapter, CacheError, CacheEventBus, CacheEventPayload, CacheProvider, DatabaseCacheAdapter,
    IncrementError, InMemoryCacheAdapter,
};
pub use lock::{
    DatabaseLockAdapter, DatabaseLockAdapterPromotion, InMemoryLockAdapter, LockAdapter, LockError,
    LockEventBus, LockEventPayload, LockHandle, LockProvider, LockReleaseResult, LockRefreshResult,
    LockState, RefreshLockError, RunLockError,
};
pub use semaphore::{
    DatabaseSemaphoreAdapter, DatabaseSemaphoreAdapterPromotion, InMemorySemaphoreAdapter,
    RunSemaphoreError, SemaphoreAdapter, SemaphoreError, SemaphoreEventBus, SemaphoreEventPayload,
    SemaphoreHandle, SemaphoreProvider, SemaphoreRefreshResult, SemaphoreReleaseResult, SemaphoreState,
};
