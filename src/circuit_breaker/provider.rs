//! Provider/handle pattern for circuit breakers, mirroring the shape used by
//! the coordination adapters: one [`CircuitBreakerProvider`] owns the policy
//! and shared storage, and cheap per-key [`CircuitBreakerHandle`]s are handed
//! out to call sites.

use super::storage::{CircuitBreakerStorage, InMemoryCircuitBreakerStorage};
use super::{CircuitBreakerPolicyKind, CircuitBreakerState, PolicyOutcome};
use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{CircuitBreakerEvent, PolicyEvent, PolicyEventListener};
use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

enum Gate {
    Proceed { entered_half_open: bool },
    Reject { failure_count: usize, open_duration: Duration },
}

/// Owns a circuit breaker policy plus the shared state backing every key.
pub struct CircuitBreakerProvider<P, S = InMemoryCircuitBreakerStorage<<P as CircuitBreakerPolicyKind>::Metrics>>
where
    P: CircuitBreakerPolicyKind,
{
    policy: Arc<P>,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    max_half_open_calls: usize,
    async_tracking: bool,
    telemetry: Option<PolicyEventListener>,
}

impl<P, S> Clone for CircuitBreakerProvider<P, S>
where
    P: CircuitBreakerPolicyKind,
{
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            max_half_open_calls: self.max_half_open_calls,
            async_tracking: self.async_tracking,
            telemetry: self.telemetry.clone(),
        }
    }
}

impl<P> CircuitBreakerProvider<P, InMemoryCircuitBreakerStorage<P::Metrics>>
where
    P: CircuitBreakerPolicyKind,
{
    /// Build a provider backed by the in-memory storage, the common case.
    pub fn new(policy: P) -> Self {
        Self {
            policy: Arc::new(policy),
            storage: Arc::new(InMemoryCircuitBreakerStorage::new()),
            clock: Arc::new(MonotonicClock::default()),
            max_half_open_calls: 1,
            async_tracking: false,
            telemetry: None,
        }
    }
}

impl<P, S> CircuitBreakerProvider<P, S>
where
    P: CircuitBreakerPolicyKind,
    S: CircuitBreakerStorage<P::Metrics>,
{
    pub fn with_storage(policy: P, storage: S) -> Self {
        Self {
            policy: Arc::new(policy),
            storage: Arc::new(storage),
            clock: Arc::new(MonotonicClock::default()),
            max_half_open_calls: 1,
            async_tracking: false,
            telemetry: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of probe calls let through while half-open; defaults to 1.
    pub fn with_max_half_open_calls(mut self, n: usize) -> Self {
        self.max_half_open_calls = n.max(1);
        self
    }

    /// When enabled, the post-call metric update (tracking the outcome and
    /// any resulting state transition) is spawned after the result is handed
    /// back to the caller instead of being awaited inline. Both modes drive
    /// the same `track_success`/`track_failure` functions, so a breaker
    /// converges to the same state either way once the update lands — this
    /// only trades update latency for call latency.
    pub fn with_async_tracking(mut self, enabled: bool) -> Self {
        self.async_tracking = enabled;
        self
    }

    /// Feed every state transition this breaker makes into `listener` as a
    /// [`crate::telemetry::PolicyEvent`], in addition to its `tracing` calls.
    pub fn with_telemetry(mut self, listener: PolicyEventListener) -> Self {
        self.telemetry = Some(listener);
        self
    }

    pub fn handle(&self, key: impl Into<String>) -> CircuitBreakerHandle<P, S> {
        CircuitBreakerHandle { provider: self.clone(), key: key.into() }
    }
}

/// A single named circuit breaker backed by a [`CircuitBreakerProvider`].
pub struct CircuitBreakerHandle<P, S = InMemoryCircuitBreakerStorage<<P as CircuitBreakerPolicyKind>::Metrics>>
where
    P: CircuitBreakerPolicyKind,
{
    provider: CircuitBreakerProvider<P, S>,
    key: String,
}

impl<P, S> Clone for CircuitBreakerHandle<P, S>
where
    P: CircuitBreakerPolicyKind,
{
    fn clone(&self) -> Self {
        Self { provider: self.provider.clone(), key: self.key.clone() }
    }
}

impl<P, S> CircuitBreakerHandle<P, S>
where
    P: CircuitBreakerPolicyKind,
    S: CircuitBreakerStorage<P::Metrics> + 'static,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.provider
            .storage
            .snapshot(&self.key)
            .map(|entry| entry.state)
            .unwrap_or(CircuitBreakerState::Closed)
    }

    /// Force this breaker back to closed with fresh metrics.
    pub fn reset(&self) {
        let policy = self.provider.policy.clone();
        self.provider.storage.reset(&self.key, move || policy.initial_metrics());
        tracing::debug!(key = %self.key, "circuit breaker reset to closed");
    }

    /// Manually latch this breaker open until the next `reset`.
    pub fn isolate(&self) {
        let policy = self.provider.policy.clone();
        self.provider.storage.isolate(&self.key, move || policy.initial_metrics());
        tracing::warn!(key = %self.key, "circuit breaker isolated");
    }

    /// Run `operation` through the breaker, failing fast with
    /// [`ResilienceError::CircuitOpen`] when the gate rejects the call.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = self.provider.clock.now_millis();
        let policy = self.provider.policy.clone();
        // At least as many probes must be admitted as are needed to reach the
        // half-open success streak, or a breaker with `success_threshold > 1`
        // could never close.
        let max_half_open = self.provider.max_half_open_calls.max(policy.half_open_success_threshold());

        let gate = self.provider.storage.atomic_update(
            &self.key,
            || policy.initial_metrics(),
            |entry| match entry.state {
                CircuitBreakerState::Closed => Gate::Proceed { entered_half_open: false },
                CircuitBreakerState::Isolated => {
                    Gate::Reject { failure_count: entry.half_open_calls, open_duration: Duration::ZERO }
                }
                CircuitBreakerState::Open => {
                    let elapsed = Duration::from_millis(now.saturating_sub(entry.opened_at_millis));
                    if policy.when_half_opened(elapsed) {
                        entry.state = CircuitBreakerState::HalfOpen;
                        entry.half_open_calls = 1;
                        entry.half_open_successes = 0;
                        Gate::Proceed { entered_half_open: true }
                    } else {
                        Gate::Reject { failure_count: entry.half_open_calls, open_duration: elapsed }
                    }
                }
                CircuitBreakerState::HalfOpen => {
                    if entry.half_open_calls < max_half_open {
                        entry.half_open_calls += 1;
                        Gate::Proceed { entered_half_open: false }
                    } else {
                        let elapsed = Duration::from_millis(now.saturating_sub(entry.opened_at_millis));
                        Gate::Reject { failure_count: entry.half_open_calls, open_duration: elapsed }
                    }
                }
            },
        );

        match &gate {
            Gate::Proceed { entered_half_open: true } => {
                tracing::info!(key = %self.key, "circuit breaker → half-open");
                self.emit(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpen));
            }
            Gate::Proceed { entered_half_open: false } => {}
            Gate::Reject { failure_count, open_duration } => {
                tracing::warn!(key = %self.key, failure_count, open_duration_ms = open_duration.as_millis() as u64, "circuit breaker rejected call");
            }
        }

        if let Gate::Reject { failure_count, open_duration } = gate {
            return Err(ResilienceError::CircuitOpen { failure_count, open_duration });
        }

        match operation().await {
            Ok(value) => {
                self.track_outcome(Self::track_success);
                Ok(value)
            }
            Err(err) => {
                self.track_outcome(Self::track_failure);
                Err(ResilienceError::Inner(err))
            }
        }
    }

    fn emit(&self, event: PolicyEvent) {
        if let Some(listener) = &self.provider.telemetry {
            listener(event);
        }
    }

    /// Run the post-call metric update inline, or hand it to `tokio::spawn`
    /// when `async_tracking` is set. Either way `track` runs exactly once
    /// against the same storage and policy, so the breaker converges to the
    /// same state regardless of mode once the update has landed.
    fn track_outcome(&self, track: fn(Arc<S>, Arc<P>, String, Arc<dyn Clock>, Option<PolicyEventListener>)) {
        let storage = self.provider.storage.clone();
        let policy = self.provider.policy.clone();
        let clock = self.provider.clock.clone();
        let key = self.key.clone();
        let telemetry = self.provider.telemetry.clone();
        if self.provider.async_tracking {
            tokio::spawn(async move { track(storage, policy, key, clock, telemetry) });
        } else {
            track(storage, policy, key, clock, telemetry);
        }
    }

    fn track_success(storage: Arc<S>, policy: Arc<P>, key: String, _clock: Arc<dyn Clock>, telemetry: Option<PolicyEventListener>) {
        let mut closed_from_half_open = false;
        let mut half_open_progress = None;
        storage.atomic_update(&key, || policy.initial_metrics(), |entry| {
            entry.metrics = policy.track_success(&entry.metrics);
            if matches!(entry.state, CircuitBreakerState::HalfOpen) {
                entry.half_open_successes += 1;
                let needed = policy.half_open_success_threshold();
                if entry.half_open_successes >= needed {
                    entry.state = CircuitBreakerState::Closed;
                    entry.half_open_calls = 0;
                    entry.half_open_successes = 0;
                    closed_from_half_open = true;
                } else {
                    half_open_progress = Some((entry.half_open_successes, needed));
                }
            }
        });
        if closed_from_half_open {
            tracing::info!(key = %key, "circuit breaker → closed");
            if let Some(listener) = telemetry {
                listener(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Closed));
            }
        } else if let Some((successes, needed)) = half_open_progress {
            tracing::info!(key = %key, successes, needed, "circuit breaker half-open probe succeeded");
        } else {
            tracing::debug!(key = %key, "circuit breaker call succeeded");
        }
    }

    fn track_failure(storage: Arc<S>, policy: Arc<P>, key: String, clock: Arc<dyn Clock>, telemetry: Option<PolicyEventListener>) {
        let now = clock.now_millis();
        let mut tripped = false;
        let mut reopened_from_half_open = false;
        // Policy metrics are opaque to the provider, so the telemetry event
        // can't report an exact streak length; it marks the transition.
        let failure_count = 0;
        storage.atomic_update(&key, || policy.initial_metrics(), |entry| {
            entry.metrics = policy.track_failure(&entry.metrics);
            match entry.state {
                CircuitBreakerState::HalfOpen => {
                    entry.state = CircuitBreakerState::Open;
                    entry.opened_at_millis = now;
                    entry.half_open_calls = 0;
                    entry.half_open_successes = 0;
                    reopened_from_half_open = true;
                }
                CircuitBreakerState::Closed => {
                    if policy.when_closed(&entry.metrics) == PolicyOutcome::TripOpen {
                        entry.state = CircuitBreakerState::Open;
                        entry.opened_at_millis = now;
                        entry.half_open_calls = 0;
                        tripped = true;
                    }
                }
                _ => {}
            }
        });
        if reopened_from_half_open {
            tracing::warn!(key = %key, "circuit breaker: half-open probe failed → open");
            if let Some(listener) = telemetry {
                listener(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened { failure_count }));
            }
        } else if tripped {
            tracing::error!(key = %key, "circuit breaker → open");
            if let Some(listener) = telemetry {
                listener(PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened { failure_count }));
            }
        } else {
            tracing::debug!(key = %key, "circuit breaker call failed");
        }
    }
}
