//! Retry policy implementation
//!
//! Provides configurable retry with backoff and jitter, plus retry predicate and pluggable sleeper.

use crate::error::push_bounded;
use crate::telemetry::{PolicyEvent, PolicyEventListener, RetryEvent};
use crate::{Backoff, Jitter, ResilienceError, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Called before sleeping ahead of a retry attempt.
pub type OnRetryDelay<E> = Arc<dyn Fn(usize, Duration, &E) + Send + Sync>;
/// Called immediately before each execution attempt (including the first).
pub type OnExecutionAttempt = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff<E>,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    on_execution_attempt: Option<OnExecutionAttempt>,
    on_retry_delay: Option<OnRetryDelay<E>>,
    telemetry: Option<PolicyEventListener>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let started_at = Instant::now();
        let mut failures = Vec::new();

        for attempt in 0..self.max_attempts {
            if let Some(cb) = &self.on_execution_attempt {
                cb(attempt);
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(e)) => {
                    // Check if we should retry this error
                    if !(self.should_retry)(&e) {
                        return Err(ResilienceError::Inner(e));
                    }

                    // If this was the last attempt, return RetryExhausted
                    if attempt + 1 >= self.max_attempts {
                        push_bounded(&mut failures, e);
                        if let Some(listener) = &self.telemetry {
                            listener(PolicyEvent::Retry(RetryEvent::Exhausted {
                                total_attempts: self.max_attempts,
                                total_duration: started_at.elapsed(),
                            }));
                        }
                        return Err(ResilienceError::RetryExhausted {
                            attempts: self.max_attempts,
                            failures,
                        });
                    }

                    // Calculate backoff delay (backoff.delay is 1-indexed) and apply jitter
                    let mut delay = self.backoff.delay(attempt + 1, Some(&e));
                    delay = self.jitter.apply(delay);

                    if let Some(cb) = &self.on_retry_delay {
                        cb(attempt + 1, delay, &e);
                    }
                    if let Some(listener) = &self.telemetry {
                        listener(PolicyEvent::Retry(RetryEvent::Attempt { attempt: attempt + 1, delay }));
                    }
                    push_bounded(&mut failures, e);

                    // Sleep before next attempt
                    self.sleeper.sleep(delay).await;
                }
                // Non-Inner errors (Timeout, CircuitOpen, RetryExhausted, HedgingExhausted) are not retried
                Err(e) => return Err(e),
            }
        }

        // Should be unreachable due to loop logic, but satisfy compiler
        unreachable!("Retry loop should have returned or errored")
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff<E>,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    on_execution_attempt: Option<OnExecutionAttempt>,
    on_retry_delay: Option<OnRetryDelay<E>>,
    telemetry: Option<PolicyEventListener>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1), Duration::from_secs(60)),
            jitter: Jitter::full(),
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
            on_execution_attempt: None,
            on_retry_delay: None,
            telemetry: None,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff<E>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Invoked immediately before each execution attempt, including the first.
    pub fn on_execution_attempt<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_execution_attempt = Some(Arc::new(callback));
        self
    }

    /// Invoked after a retryable failure, just before sleeping for the computed delay.
    pub fn on_retry_delay<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, Duration, &E) + Send + Sync + 'static,
    {
        self.on_retry_delay = Some(Arc::new(callback));
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Feed every retry attempt and exhaustion into `listener` as a
    /// [`crate::telemetry::PolicyEvent`], in addition to `on_execution_attempt`/
    /// `on_retry_delay`.
    pub fn with_telemetry(mut self, listener: PolicyEventListener) -> Self {
        self.telemetry = Some(listener);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
            on_execution_attempt: self.on_execution_attempt,
            on_retry_delay: self.on_retry_delay,
            telemetry: self.telemetry,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
