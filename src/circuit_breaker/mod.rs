//! Circuit breaker policy engine.
//!
//! Generalizes the single consecutive-failure breaker into a pluggable policy
//! design: a [`CircuitBreakerPolicyKind`] owns a pure metrics type and pure
//! transition functions, while [`CircuitBreakerStorage`] holds the shared
//! state behind a mutex-guarded map (one entry per key) rather than a single
//! set of atomics, since heterogeneous metrics no longer fit in one `AtomicU8`.

mod policy;
mod provider;
mod storage;

pub use policy::{
    ConsecutivePolicy, CountSlidingWindowPolicy, PolicyOutcome, SamplingTimeWindowPolicy,
};
pub use provider::{CircuitBreakerHandle, CircuitBreakerProvider};
pub use storage::{CircuitBreakerStorage, InMemoryCircuitBreakerStorage};

use std::time::Duration;

/// Observable state of a single circuit breaker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Calls pass through to the operation.
    Closed,
    /// Calls fail fast with `ResilienceError::CircuitOpen`.
    Open,
    /// A bounded number of test calls are allowed through to probe recovery.
    HalfOpen,
    /// Manually latched open; only an explicit `reset()` clears it.
    Isolated,
}

/// Pure decision logic for one circuit breaker algorithm.
///
/// Implementations never touch shared state directly; [`CircuitBreakerProvider`]
/// threads the pure `Metrics` value through a mutex-guarded map entry.
pub trait CircuitBreakerPolicyKind: Send + Sync + 'static {
    /// Policy-specific metrics (consecutive failure count, sliding window, ...).
    type Metrics: Clone + Send + Sync + 'static;

    fn initial_metrics(&self) -> Self::Metrics;

    /// Decide whether a closed breaker should trip open given updated metrics.
    fn when_closed(&self, metrics: &Self::Metrics) -> PolicyOutcome;

    /// Decide whether an open breaker, having waited `elapsed_since_open`, may
    /// transition to half-open.
    fn when_half_opened(&self, elapsed_since_open: Duration) -> bool;

    fn track_success(&self, metrics: &Self::Metrics) -> Self::Metrics;
    fn track_failure(&self, metrics: &Self::Metrics) -> Self::Metrics;

    /// Consecutive half-open probe successes required before a breaker
    /// closes again. Policies that don't distinguish a probe streak (the
    /// window-based policies) keep the default of one.
    fn half_open_success_threshold(&self) -> usize {
        1
    }
}
