//! Resilience middlewares: retry, timeout, fallback, and hedging.
//!
//! `retry` and `timeout` both wrap a single reusable operation closure and
//! compose linearly, so [`ResilienceStack`] chains the two the way the
//! teacher's retired stack builder chained its layers. `FallbackPolicy` and
//! `HedgingPolicy` are fan-out/binary combinators (two operations, or a
//! named list of them) rather than single-operation wrappers, so they
//! compose by nesting a stack's `execute` call inside them rather than by
//! being folded into the same linear chain — matching the Design Note that
//! the recommended Fallback → Retry → Timeout → Hedging → circuit breaker
//! ordering is a convention, not a mandated single type. Wrap a circuit
//! breaker around a stack the same way, via
//! `breaker_handle.call(|| stack.execute(op))`.

pub mod fallback;
pub mod hedging;
pub mod retry;
pub mod timeout;

pub use fallback::{FallbackPolicy, FallbackPolicyBuilder};
pub use hedging::{HedgeMode, HedgingPolicy, HedgingPolicyBuilder};
pub use retry::{OnExecutionAttempt, OnRetryDelay, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{OnTimeout, TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

use crate::ResilienceError;
use std::future::Future;

/// Composes retry and timeout, the two middlewares that each wrap a single
/// reusable operation. Order is fixed: retry is outermost, so a slow
/// attempt is timed out and retried, rather than the whole retry budget
/// being subject to one timeout.
#[derive(Clone, Debug, Default)]
pub struct ResilienceStack<E> {
    retry: Option<RetryPolicy<E>>,
    timeout: Option<TimeoutPolicy>,
}

impl<E> ResilienceStack<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: Fn() -> Fut + Send,
    {
        match (&self.retry, &self.timeout) {
            (Some(retry), Some(timeout)) => retry.execute(|| timeout.execute(|| operation())).await,
            (Some(retry), None) => retry.execute(|| operation()).await,
            (None, Some(timeout)) => timeout.execute(|| operation()).await,
            (None, None) => operation().await,
        }
    }
}

#[derive(Default)]
pub struct ResilienceStackBuilder<E> {
    retry: Option<RetryPolicy<E>>,
    timeout: Option<TimeoutPolicy>,
}

impl<E> ResilienceStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { retry: None, timeout: None }
    }

    pub fn retry(mut self, retry: RetryPolicy<E>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ResilienceStack<E> {
        ResilienceStack { retry: self.retry, timeout: self.timeout }
    }
}
