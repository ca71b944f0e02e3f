//! Deferred tasks: stateless-until-awaited units of work with cooperative
//! cancellation and middleware chains.
//!
//! A [`Task`] wraps a re-runnable thunk. Each call to [`Task::run`] drives a
//! fresh execution through the task's middleware chain — there is no
//! memoization, matching the "stateless until awaited" contract. `pipe`
//! returns a new task with one more middleware appended to the chain; the
//! original task is untouched.

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque reason a [`Signal`] was aborted.
#[derive(Clone)]
pub struct CancelReason(Arc<dyn std::error::Error + Send + Sync>);

impl CancelReason {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelReason({})", self.0)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CancelReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

#[derive(Default)]
struct SignalInner {
    aborted: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: tokio::sync::Notify,
}

/// Cooperative cancellation handle. Cloning shares the same underlying state;
/// aborting any clone aborts all of them. Middlewares that wrap a task's
/// execution must forward this signal into whatever they race against
/// (timeouts, hedged siblings) so an external abort wakes every suspension
/// point.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("aborted", &self.is_aborted()).finish()
    }
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Synchronously flips the signal and wakes any pending `cancelled()` waiters.
    pub fn abort(&self, reason: CancelReason) {
        let mut guard = self.inner.reason.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            *guard = Some(reason);
        }
        drop(guard);
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once the signal is aborted. Used by middlewares to race
    /// their own timers/futures against external cancellation.
    pub async fn cancelled(&self) {
        if self.is_aborted() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
            if self.is_aborted() {
                return;
            }
        }
    }

    /// A new, never-aborted signal derived from this one (used by hedging to
    /// give each sibling its own cancellable scope while sharing the parent's
    /// abort as an upstream cause would — callers link them manually).
    pub fn child(&self) -> Self {
        Self::new()
    }
}

/// Glues a [`Signal`] to an adapter's own cancellation mechanism (e.g. forwarding
/// abort into an HTTP client request builder). Bound before the task's thunk runs.
pub trait SignalBinder: Send + Sync {
    fn bind(&self, signal: &Signal);
}

/// A deferred, re-runnable unit of async work.
///
/// Stateless until awaited: constructing a `Task` does not run anything.
/// Each [`Task::run`] call re-invokes the thunk; there is no memoization of
/// results across runs.
pub struct Task<T, E> {
    thunk: Arc<dyn Fn(Signal) -> BoxFuture<'static, Result<T, E>> + Send + Sync>,
    middlewares: Vec<Arc<dyn crate::middleware::Middleware<T, E>>>,
    signal_binder: Option<Arc<dyn SignalBinder>>,
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            thunk: self.thunk.clone(),
            middlewares: self.middlewares.clone(),
            signal_binder: self.signal_binder.clone(),
        }
    }
}

impl<T, E> Task<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Build a task from a thunk that ignores cancellation.
    pub fn new<F, Fut>(thunk: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            thunk: Arc::new(move |_signal| Box::pin(thunk())),
            middlewares: Vec::new(),
            signal_binder: None,
        }
    }

    /// Build a task from a thunk that observes the execution's cancellation signal.
    pub fn new_cancellable<F, Fut>(thunk: F) -> Self
    where
        F: Fn(Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            thunk: Arc::new(move |signal| Box::pin(thunk(signal))),
            middlewares: Vec::new(),
            signal_binder: None,
        }
    }

    /// Attach a [`SignalBinder`] invoked with the execution's signal just before the thunk runs.
    pub fn with_signal_binder(mut self, binder: Arc<dyn SignalBinder>) -> Self {
        self.signal_binder = Some(binder);
        self
    }

    /// Return a new task with `middleware` appended to the chain; the receiver is untouched.
    pub fn pipe(&self, middleware: Arc<dyn crate::middleware::Middleware<T, E>>) -> Self {
        let mut middlewares = self.middlewares.clone();
        middlewares.push(middleware);
        Self { thunk: self.thunk.clone(), middlewares, signal_binder: self.signal_binder.clone() }
    }

    /// Like [`Task::pipe`] but only applies the middleware when `predicate` holds.
    pub fn pipe_when(&self, predicate: bool, middleware: Arc<dyn crate::middleware::Middleware<T, E>>) -> Self {
        if predicate {
            self.pipe(middleware)
        } else {
            self.clone()
        }
    }

    /// Run this task once, with a caller-supplied signal (or a fresh one if `None`).
    pub async fn run_with_signal(&self, signal: Option<Signal>) -> Result<T, E> {
        let signal = signal.unwrap_or_default();
        if let Some(binder) = &self.signal_binder {
            binder.bind(&signal);
        }
        let thunk = self.thunk.clone();
        let base: crate::middleware::NextFn<T, E> =
            Arc::new(move |ctx: crate::middleware::MiddlewareContext| thunk(ctx.signal));
        let composed = crate::middleware::compose(&self.middlewares, base);
        let ctx = crate::middleware::MiddlewareContext::new("task", signal);
        composed(ctx).await
    }

    /// Run this task once with a freshly-created signal.
    pub async fn run(&self) -> Result<T, E> {
        self.run_with_signal(None).await
    }
}

/// Convenience constructor: a task that resolves after `duration`, cancellable
/// via the execution signal.
pub fn delay(duration: std::time::Duration) -> Task<(), std::convert::Infallible> {
    Task::new_cancellable(move |signal| async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = signal.cancelled() => Ok(()),
        }
    })
}

/// Wrap a plain callback (sync, infallible) as a task.
pub fn from_callback<T, F>(f: F) -> Task<T, std::convert::Infallible>
where
    T: Send + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Task::new(move || {
        let value = f();
        async move { Ok(value) }
    })
}

/// Run all tasks concurrently; resolves once every task has resolved,
/// failing fast on the first error (remaining tasks are not cancelled,
/// matching `run` semantics of "stateless until awaited" — they were
/// already started).
pub async fn all<T, E>(tasks: &[Task<T, E>]) -> Result<Vec<T>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let futs = tasks.iter().map(|t| t.run());
    let results = futures::future::join_all(futs).await;
    results.into_iter().collect()
}

/// Outcome of one task within [`all_settled`].
pub enum Settled<T, E> {
    Ok(T),
    Err(E),
}

/// Run all tasks concurrently, collecting every outcome regardless of failure.
pub async fn all_settled<T, E>(tasks: &[Task<T, E>]) -> Vec<Settled<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let futs = tasks.iter().map(|t| t.run());
    futures::future::join_all(futs)
        .await
        .into_iter()
        .map(|r| match r {
            Ok(v) => Settled::Ok(v),
            Err(e) => Settled::Err(e),
        })
        .collect()
}

/// Resolve with the first task to complete (success or failure).
pub async fn race<T, E>(tasks: &[Task<T, E>]) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let futs: Vec<_> = tasks.iter().map(|t| Box::pin(t.run())).collect();
    let (result, _index, _rest) = futures::future::select_all(futs).await;
    result
}

/// Resolve with the first task to *succeed*; fails only if every task fails,
/// carrying the last error observed.
pub async fn any<T, E>(tasks: &[Task<T, E>]) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut futs: Vec<_> = tasks.iter().map(|t| Box::pin(t.run())).collect();
    let mut last_err = None;
    while !futs.is_empty() {
        let (result, _index, rest) = futures::future::select_all(futs).await;
        match result {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                futs = rest;
            }
        }
    }
    Err(last_err.expect("any() called with at least one task"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn task_is_rerunnable_without_memoization() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task: Task<usize, std::convert::Infallible> = Task::new(move || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, AtomicOrdering::SeqCst)) }
        });

        assert_eq!(task.run().await.unwrap(), 0);
        assert_eq!(task.run().await.unwrap(), 1);
        assert_eq!(task.run().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn signal_abort_wakes_cancelled_waiters() {
        let signal = Signal::new();
        let waiter_signal = signal.clone();
        let handle = tokio::spawn(async move {
            waiter_signal.cancelled().await;
        });
        signal.abort(CancelReason::new(std::io::Error::new(std::io::ErrorKind::Other, "stop")));
        handle.await.unwrap();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn delay_task_resolves_after_duration() {
        tokio::time::pause();
        let task = delay(std::time::Duration::from_millis(50));
        let fut = task.run();
        tokio::pin!(fut);
        tokio::time::advance(std::time::Duration::from_millis(51)).await;
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn all_collects_every_result_in_order() {
        let tasks: Vec<Task<usize, std::convert::Infallible>> =
            (0..3).map(|i| Task::new(move || async move { Ok(i) })).collect();
        let results = all(&tasks).await.unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn all_settled_reports_both_outcomes() {
        let tasks: Vec<Task<usize, &'static str>> = vec![
            Task::new(|| async { Ok(1) }),
            Task::new(|| async { Err("boom") }),
        ];
        let results = all_settled(&tasks).await;
        assert!(matches!(results[0], Settled::Ok(1)));
        assert!(matches!(results[1], Settled::Err("boom")));
    }

    #[tokio::test]
    async fn any_succeeds_if_one_task_succeeds() {
        let tasks: Vec<Task<usize, &'static str>> = vec![
            Task::new(|| async { Err("first fails") }),
            Task::new(|| async { Ok(42) }),
        ];
        assert_eq!(any(&tasks).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn any_fails_only_if_all_fail() {
        let tasks: Vec<Task<usize, &'static str>> =
            vec![Task::new(|| async { Err("a") }), Task::new(|| async { Err("b") })];
        assert!(any(&tasks).await.is_err());
    }
}
