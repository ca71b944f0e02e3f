//! Convenient re-exports for common Warden types.

pub use crate::{
    backoff::Backoff,
    circuit_breaker::{
        CircuitBreakerHandle, CircuitBreakerPolicyKind, CircuitBreakerProvider, CircuitBreakerState,
        CircuitBreakerStorage, ConsecutivePolicy, CountSlidingWindowPolicy, InMemoryCircuitBreakerStorage,
        SamplingTimeWindowPolicy,
    },
    clock::{Clock, ManualClock, MonotonicClock},
    coordination::{
        CacheAdapter, CacheProvider, DatabaseCacheAdapter, DatabaseLockAdapter, DatabaseSemaphoreAdapter,
        InMemoryCacheAdapter, InMemoryLockAdapter, InMemorySemaphoreAdapter, LockAdapter, LockHandle,
        LockProvider, SemaphoreAdapter, SemaphoreHandle, SemaphoreProvider,
    },
    error::ResilienceError,
    event_bus::{Event, EventBus, Listener, Unsubscribe},
    jitter::Jitter,
    namespace::{Key, Namespace},
    resilience::{FallbackPolicy, HedgingPolicy, ResilienceStack, RetryPolicy, TimeoutPolicy},
    serde_transformer::{HandleTag, SerdeTransformer, TransformerRegistry},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper},
    task::{CancelReason, Signal, Task},
};
