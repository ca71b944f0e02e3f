//! Hook/middleware pipeline: `(ctx, next) -> result`, composed by folding a
//! chain `[m1, m2, m3]` into `m1(m2(m3(base)))`.

use crate::task::Signal;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-invocation context threaded through a middleware chain.
#[derive(Clone)]
pub struct MiddlewareContext {
    pub name: &'static str,
    pub signal: Signal,
    extensions: Arc<Mutex<HashMap<String, String>>>,
}

impl MiddlewareContext {
    pub fn new(name: &'static str, signal: Signal) -> Self {
        Self { name, signal, extensions: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.extensions.lock().unwrap_or_else(|p| p.into_inner()).insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.extensions.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
    }

    /// Abort the execution signal, e.g. when a timeout fires.
    pub fn abort(&self, reason: crate::task::CancelReason) {
        self.signal.abort(reason);
    }
}

/// The continuation a middleware invokes to run the rest of the chain.
pub type NextFn<T, E> = Arc<dyn Fn(MiddlewareContext) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// A single pipeline stage.
#[async_trait]
pub trait Middleware<T, E>: Send + Sync {
    fn name(&self) -> &'static str {
        "middleware"
    }

    async fn call(&self, ctx: MiddlewareContext, next: NextFn<T, E>) -> Result<T, E>;
}

/// Fold `[m1, m2, m3]` and a base operation into one callable: `m1(m2(m3(base)))`.
pub fn compose<T, E>(
    middlewares: &[Arc<dyn Middleware<T, E>>],
    base: NextFn<T, E>,
) -> NextFn<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    middlewares.iter().rev().fold(base, |next, mw| {
        let mw = mw.clone();
        let next = next.clone();
        Arc::new(move |ctx: MiddlewareContext| {
            let mw = mw.clone();
            let next = next.clone();
            Box::pin(async move { mw.call(ctx, next).await })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingMiddleware {
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware<u32, &'static str> for RecordingMiddleware {
        async fn call(&self, ctx: MiddlewareContext, next: NextFn<u32, &'static str>) -> Result<u32, &'static str> {
            self.order.lock().unwrap().push(self.label);
            next(ctx).await
        }
    }

    #[tokio::test]
    async fn composition_runs_outer_to_inner_then_base() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware<u32, &'static str>>> = vec![
            Arc::new(RecordingMiddleware { label: "m1", order: order.clone() }),
            Arc::new(RecordingMiddleware { label: "m2", order: order.clone() }),
            Arc::new(RecordingMiddleware { label: "m3", order: order.clone() }),
        ];
        let base: NextFn<u32, &'static str> = Arc::new(|_ctx| Box::pin(async { Ok(7) }));
        let composed = compose(&middlewares, base);

        let ctx = MiddlewareContext::new("test", Signal::new());
        let result = composed(ctx).await;

        assert_eq!(result, Ok(7));
        assert_eq!(*order.lock().unwrap(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn empty_chain_just_runs_base() {
        let middlewares: Vec<Arc<dyn Middleware<u32, &'static str>>> = vec![];
        let base: NextFn<u32, &'static str> = Arc::new(|_ctx| Box::pin(async { Ok(1) }));
        let composed = compose(&middlewares, base);
        let ctx = MiddlewareContext::new("test", Signal::new());
        assert_eq!(composed(ctx).await, Ok(1));
    }

    #[tokio::test]
    async fn context_extensions_roundtrip() {
        let ctx = MiddlewareContext::new("test", Signal::new());
        assert_eq!(ctx.get("k"), None);
        ctx.set("k", "v");
        assert_eq!(ctx.get("k"), Some("v".to_string()));
    }

    #[tokio::test]
    async fn middleware_can_short_circuit_without_calling_next() {
        struct ShortCircuit;
        #[async_trait]
        impl Middleware<u32, &'static str> for ShortCircuit {
            async fn call(&self, _ctx: MiddlewareContext, _next: NextFn<u32, &'static str>) -> Result<u32, &'static str> {
                Err("blocked")
            }
        }
        let middlewares: Vec<Arc<dyn Middleware<u32, &'static str>>> = vec![Arc::new(ShortCircuit)];
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = called.clone();
        let base: NextFn<u32, &'static str> = Arc::new(move |_ctx| {
            called_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(1) })
        });
        let composed = compose(&middlewares, base);
        let ctx = MiddlewareContext::new("test", Signal::new());
        assert_eq!(composed(ctx).await, Err("blocked"));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
