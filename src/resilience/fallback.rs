//! Fallback middleware: run a primary operation, and on a retryable failure
//! run a secondary operation instead of propagating the error.
//!
//! Grounded in the try-primary-then-secondary shape of the composable
//! service layers the telemetry sinks use for the same purpose
//! (`telemetry::sinks::FallbackSink`), generalized from sink dispatch to
//! arbitrary fallible operations.

use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;

/// Called when the primary operation fails and the fallback is about to run.
pub type OnFallback<E> = Arc<dyn Fn(&E) + Send + Sync>;
/// Decides whether a given inner error should trigger the fallback at all.
pub type ErrorPolicy<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct FallbackPolicy<E> {
    should_fallback: ErrorPolicy<E>,
    on_fallback: Option<OnFallback<E>>,
}

impl<E> std::fmt::Debug for FallbackPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPolicy").finish_non_exhaustive()
    }
}

impl<E> FallbackPolicy<E> {
    pub fn builder() -> FallbackPolicyBuilder<E> {
        FallbackPolicyBuilder::new()
    }

    /// Run `primary`; if it returns a retryable `Inner` error, run `secondary`.
    /// Non-`Inner` errors (timeout, circuit open, ...) pass through untouched.
    pub async fn execute<T, FutP, FutS, Primary, Secondary>(
        &self,
        primary: Primary,
        secondary: Secondary,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        FutP: Future<Output = Result<T, ResilienceError<E>>> + Send,
        FutS: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Primary: FnOnce() -> FutP + Send,
        Secondary: FnOnce() -> FutS + Send,
    {
        match primary().await {
            Ok(value) => Ok(value),
            Err(ResilienceError::Inner(e)) if (self.should_fallback)(&e) => {
                if let Some(cb) = &self.on_fallback {
                    cb(&e);
                }
                secondary().await
            }
            Err(e) => Err(e),
        }
    }
}

pub struct FallbackPolicyBuilder<E> {
    should_fallback: ErrorPolicy<E>,
    on_fallback: Option<OnFallback<E>>,
}

impl<E> FallbackPolicyBuilder<E> {
    pub fn new() -> Self {
        Self { should_fallback: Arc::new(|_| true), on_fallback: None }
    }

    pub fn should_fallback<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_fallback = Arc::new(predicate);
        self
    }

    pub fn on_fallback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> FallbackPolicy<E> {
        FallbackPolicy { should_fallback: self.should_fallback, on_fallback: self.on_fallback }
    }
}

impl<E> Default for FallbackPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn primary_success_skips_secondary() {
        let policy = FallbackPolicy::<TestError>::builder().build();
        let secondary_calls = Arc::new(AtomicUsize::new(0));
        let secondary_calls_clone = secondary_calls.clone();

        let result = policy
            .execute(
                || async { Ok::<_, ResilienceError<TestError>>(1) },
                || async move {
                    secondary_calls_clone.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(2)
                },
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn primary_failure_runs_secondary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let policy = FallbackPolicy::builder().on_fallback(move |_| { calls_clone.fetch_add(1, Ordering::SeqCst); }).build();

        let result = policy
            .execute(
                || async { Err::<i32, _>(ResilienceError::Inner(TestError("boom"))) },
                || async { Ok::<_, ResilienceError<TestError>>(9) },
            )
            .await;

        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_fallback_predicate_gates_fallback() {
        let policy = FallbackPolicy::builder().should_fallback(|e: &TestError| e.0 == "retryable").build();

        let result = policy
            .execute(
                || async { Err::<i32, _>(ResilienceError::Inner(TestError("fatal"))) },
                || async { Ok::<_, ResilienceError<TestError>>(0) },
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Inner(TestError("fatal")))));
    }

    #[tokio::test]
    async fn non_inner_errors_bypass_fallback() {
        let policy = FallbackPolicy::<TestError>::builder().build();

        let result = policy
            .execute(
                || async {
                    Err::<i32, _>(ResilienceError::CircuitOpen {
                        failure_count: 5,
                        open_duration: std::time::Duration::from_secs(1),
                    })
                },
                || async { Ok::<_, ResilienceError<TestError>>(0) },
            )
            .await;

        assert!(result.unwrap_err().is_circuit_open());
    }
}
