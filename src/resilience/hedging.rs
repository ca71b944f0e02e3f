//! Hedging middleware: race or chain a primary operation against named
//! fallbacks.
//!
//! Parallel hedging launches every operation, staggered by `wait_time`
//! between successive launches, and returns the first success, aborting the
//! rest (grounded in the teacher's `tokio::spawn` worker-task pattern in
//! `telemetry::sinks::NonBlockingSink`, here used to race rather than queue).
//! Sequential hedging runs one operation at a time, moving to the next on
//! failure or on a per-attempt `wait_time` timeout.

use crate::error::push_bounded;
use crate::ResilienceError;
use futures::future::{select_all, BoxFuture};
use std::sync::Arc;
use std::time::Duration;

/// A single hedge candidate: primary or one of its fallbacks.
pub type HedgeOperation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
pub type OnHedgeAttempt = Arc<dyn Fn(usize) + Send + Sync>;
pub type OnHedgeError<E> = Arc<dyn Fn(usize, &E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeMode {
    /// Launch every operation, staggered, first success wins.
    Parallel,
    /// Run operations one at a time, advancing on failure or timeout.
    Sequential,
}

pub struct HedgingPolicy<T, E> {
    operations: Vec<HedgeOperation<T, E>>,
    wait_time: Duration,
    mode: HedgeMode,
    on_hedge_attempt: Option<OnHedgeAttempt>,
    on_hedge_error: Option<OnHedgeError<E>>,
}

impl<T, E> std::fmt::Debug for HedgingPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgingPolicy")
            .field("operations", &self.operations.len())
            .field("wait_time", &self.wait_time)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<T, E> HedgingPolicy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn builder() -> HedgingPolicyBuilder<T, E> {
        HedgingPolicyBuilder::new()
    }

    pub async fn execute(&self) -> Result<T, ResilienceError<E>> {
        match self.mode {
            HedgeMode::Parallel => self.execute_parallel().await,
            HedgeMode::Sequential => self.execute_sequential().await,
        }
    }

    async fn execute_parallel(&self) -> Result<T, ResilienceError<E>> {
        let mut handles = Vec::with_capacity(self.operations.len());
        for (idx, op) in self.operations.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.wait_time).await;
            }
            if let Some(cb) = &self.on_hedge_attempt {
                cb(idx);
            }
            let op = op.clone();
            handles.push(tokio::spawn(async move { op().await }));
        }

        let mut remaining = handles;
        let mut failures = Vec::new();
        while !remaining.is_empty() {
            let (result, idx, rest) = select_all(remaining).await;
            remaining = rest;
            match result {
                Ok(Ok(value)) => {
                    for handle in &remaining {
                        handle.abort();
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if let Some(cb) = &self.on_hedge_error {
                        cb(idx, &e);
                    }
                    push_bounded(&mut failures, e);
                }
                Err(_join_error) => {
                    // Task was aborted or panicked; neither contributes an E value.
                }
            }
        }
        Err(ResilienceError::HedgingExhausted { failures })
    }

    /// Timed-out attempts are skipped without contributing an error value to
    /// the aggregate (the opaque `E` can't be synthesized from a timeout).
    async fn execute_sequential(&self) -> Result<T, ResilienceError<E>> {
        let mut failures = Vec::new();
        for (idx, op) in self.operations.iter().enumerate() {
            if let Some(cb) = &self.on_hedge_attempt {
                cb(idx);
            }
            match tokio::time::timeout(self.wait_time, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if let Some(cb) = &self.on_hedge_error {
                        cb(idx, &e);
                    }
                    push_bounded(&mut failures, e);
                }
                Err(_elapsed) => {}
            }
        }
        Err(ResilienceError::HedgingExhausted { failures })
    }
}

pub struct HedgingPolicyBuilder<T, E> {
    operations: Vec<HedgeOperation<T, E>>,
    wait_time: Duration,
    mode: HedgeMode,
    on_hedge_attempt: Option<OnHedgeAttempt>,
    on_hedge_error: Option<OnHedgeError<E>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    NoOperations,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::NoOperations => write!(f, "hedging policy requires at least one operation"),
        }
    }
}

impl std::error::Error for BuildError {}

impl<T, E> HedgingPolicyBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            wait_time: Duration::from_millis(100),
            mode: HedgeMode::Sequential,
            on_hedge_attempt: None,
            on_hedge_error: None,
        }
    }

    pub fn operation<F, Fut>(mut self, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
    {
        self.operations.push(Arc::new(move || Box::pin(op())));
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.mode = HedgeMode::Parallel;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.mode = HedgeMode::Sequential;
        self
    }

    pub fn on_hedge_attempt<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_hedge_attempt = Some(Arc::new(callback));
        self
    }

    pub fn on_hedge_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &E) + Send + Sync + 'static,
    {
        self.on_hedge_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<HedgingPolicy<T, E>, BuildError> {
        if self.operations.is_empty() {
            return Err(BuildError::NoOperations);
        }
        Ok(HedgingPolicy {
            operations: self.operations,
            wait_time: self.wait_time,
            mode: self.mode,
            on_hedge_attempt: self.on_hedge_attempt,
            on_hedge_error: self.on_hedge_error,
        })
    }
}

impl<T, E> Default for HedgingPolicyBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
